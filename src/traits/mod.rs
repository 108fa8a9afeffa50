//! Standard-library operator implementations for the graph and tape types.

mod std_ops;
