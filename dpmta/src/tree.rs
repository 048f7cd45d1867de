//! Octree of cells over the simulation volume, their ownership and their interaction lists.
pub mod cell_table;
pub mod constants;
pub mod domain;
pub mod helpers;
pub mod hilbert;
pub mod interaction_list;
pub mod morton;
pub mod ownership;
pub mod types;
