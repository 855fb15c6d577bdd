mod node;
mod script;
mod statistics;
mod tree;

pub use node::{Dependency, NodeId, TreeNode};
pub use script::{Script, ScriptStage};
pub use statistics::{DownloaderStatistics, ModulesGeneratorStatistics};
pub use tree::DependencyTree;

/// Name of the synthetic node all projects are attached to.
pub const ROOT_NAME: &str = "ROOT";
