mod tree;

pub use tree::{Getter, ParameterTree, ParameterTreeBuilder, Setter, TreeError};
