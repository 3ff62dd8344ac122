// SPDX-License-Identifier: Apache-2.0

//! Open-Falcon push adapter.
//!
//! Workers submit flushed points to a [`PointSink`] without blocking; the
//! production sink is a bounded queue drained by [`FalconExporter`], which
//! POSTs each batch as JSON through a [`MetricPusher`].

pub mod client;
pub mod exporter;
pub mod point;

pub use client::{FalconClient, MetricPusher};
pub use exporter::FalconExporter;
pub use point::{MetricPoint, PointSink, resolve_endpoint};
