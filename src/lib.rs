pub mod config;
pub mod error;
pub mod grid;
pub mod linegraph;
pub mod optgraph;
pub mod optim;
pub mod schematize;
pub mod solver;
pub mod topo;
