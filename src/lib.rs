//! Treemg is an asynchronous geometric multigrid solver for block-structured
//! octree meshes. Every block of a fully refined tree is addressed by a
//! compact bit-packed index, exchanges field data with its parent and
//! children through packed byte buffers, and advances through the V-cycle as
//! an independent state machine driven only by messages and global
//! reductions. The same solve can be executed with FIFO, randomly shuffled,
//! or parallel message delivery, and produces the same residual history under
//! all of them.

pub mod automaton;
pub mod block;
pub mod config;
pub mod error;
pub mod field;
pub mod field_face;
pub mod hierarchy;
pub mod index;
pub mod index_space;
pub mod interp;
pub mod metrics;
pub mod multigrid;
pub mod operator;
pub mod smoother;
