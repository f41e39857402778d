//! Spindle is a compiler middle end for tensor programs.  It orders the ops of
//! an operator graph, then plans memory for the loop nests those ops lower to.
//!
//! The library is split in two halves, which share nothing but the error type
//! and configuration.
//!
//! # Operator graphs
//! A [`Graph`](crate::graph::Graph) is an arena of ops connected by logical
//! tensors.  Every op and tensor is addressed by a dense integer id, so
//! traversal state can live in bitmaps and arrays indexed by id.
//!
//! Ops are ordered by an [`OpVisitor`](crate::graph::visitor::OpVisitor),
//! which is generic over a *selector* (which pending op to visit next) and an
//! *updater* (which ops become eligible after a visit).  The stock
//! combinations give depth-first, breadth-first, topological, and post-order
//! traversals:
//!
//! ```
//! use spindle::graph::{Graph, OpKind, visitor::OpVisitor};
//!
//! let mut g = Graph::new();
//! let (a, a_out) = g.add_op("a", OpKind::Input, &[], 1)?;
//! let (b, b_out) = g.add_op("b", OpKind::Elementwise, &a_out, 1)?;
//! let (c, c_out) = g.add_op("c", OpKind::Elementwise, &a_out, 1)?;
//! let (d, _) = g.add_op("d", OpKind::Output, &[b_out[0], c_out[0]], 0)?;
//!
//! let order = OpVisitor::bfs().sequence(&g)?;
//! assert_eq!(order.first(), Some(&a));
//! assert_eq!(order.last(), Some(&d));
//! # Ok::<(), spindle::Error>(())
//! ```
//!
//! A topological sequence can then be reordered with heuristic rules, which
//! consult an [`OpDepMatrix`](crate::graph::dep::OpDepMatrix) so that no op
//! moves past one of its dependencies.  See the [`graph::sort`] module.
//!
//! # Buffer scheduling
//! After codegen, each region is lowered to a [`Func`](crate::ir::Func): a
//! tree of loops and stores over flattened tensors.  The
//! [`BufferScheduler`](crate::passes::buffer_schedule::BufferScheduler)
//! computes the live interval of every tensor, drops stores which are never
//! observed, and places locals into the storage of dead tensors.
//!
//! Passes are configured by a [`PassConfig`](crate::config::PassConfig):
//!
//! ```
//! use spindle::config::{PassConfig, SchedulerMode};
//!
//! let cfg = PassConfig {
//!     buffer_scheduler_mode: "minimize-size".parse().unwrap(),
//!     ..PassConfig::default()
//! };
//! assert_eq!(cfg.buffer_scheduler_mode, SchedulerMode::MinimizeSize);
//! ```
#![warn(missing_docs)]

mod indexed;

pub mod config;
pub mod graph;
pub mod ir;
pub mod passes;

mod error;
pub use error::Error;
