//! Geometry primitives shared by the `tessera` crates.
//!
//! Only planar (projected) coordinates are supported: every rectangle and point is expressed in
//! the units of the map's planar CRS.

pub mod cartesian;
