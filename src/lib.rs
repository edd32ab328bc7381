//! # rcbpart
//!
//! `rcbpart` is a Rust library for parallel Recursive Coordinate Bisection (RCB): it
//! divides weighted 3D points ("dots") that are spread over many processes into a
//! requested number of partitions of prescribed relative weight, by cutting space with
//! axis-aligned planes.
//!
//! ## Features
//!
//! - **SPMD execution**: every process calls [`Rcb::partition`] with its own dots and a
//!   [`Communicator`]. An in-process communicator over rayon threads is included, and
//!   an MPI one behind the `mpi-support` feature.
//! - **Weighted median cuts**: each cut places the requested share of weight below it,
//!   with optional rectilinear handling of dots sharing a coordinate.
//! - **Cut tree**: the cuts can be kept as a [`CutTree`] answering which partition holds
//!   a point or which partitions intersect a box.
//! - **Repartitioning**: a later call can start from the previous cuts and directions.
//! - **Failure agreement**: errors on one process make every process return an error.
//!
//! ## Main Interface
//!
//! The primary entry point is the [`Rcb`] struct, configured through [`RcbConfig`].

mod bounds;
mod check;
pub mod comm;
mod config;
mod direction;
mod divide;
mod dot;
mod error;
mod group;
mod median;
mod migrate;
mod rcb;
mod serial;
mod stats;
mod tree;

pub use bounds::BoundingBox;
pub use comm::Communicator;
pub use comm::Wire;
#[cfg(feature = "mpi-support")]
pub use comm::mpi::MpiComm;
pub use comm::solo::SoloComm;
pub use comm::threads::ThreadComm;
pub use config::CheckLevel;
pub use config::RcbConfig;
pub use config::SplitStrategy;
pub use direction::DirectionOrder;
pub use divide::PartLayout;
pub use divide::PartSizes;
pub use dot::Dot;
pub use dot::DotId;
pub use dot::DIM;
pub use dot::MAX_WEIGHTS;
pub use error::RcbError;
pub use error::Result;
pub use error::Status;
pub use rcb::Import;
pub use rcb::Rcb;
pub use rcb::RcbOutput;
pub use stats::RcbStats;
pub use tree::Child;
pub use tree::CutTree;
pub use tree::ParentLink;
pub use tree::Side;
pub use tree::TreeNode;
