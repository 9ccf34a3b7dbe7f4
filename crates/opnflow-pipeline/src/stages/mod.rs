//! Concrete stage units.
//!
//! - [`ValidationStage`]: structural checks on the inputs
//! - [`CommandStage`]: generation through an external renderer command
//! - [`MergeStage`]: consolidation of the generated trees

mod command;
mod merge;
mod validate;

pub use command::CommandStage;
pub use merge::{merge_trees, safe_copy, MergeStage, MERGEABLE_EXTENSIONS};
pub(crate) use validate::report_from_task;
pub use validate::{
    ValidationStage, WorkbookInspector, WorkbookSummary, REQUIRED_COLUMNS_GROUP,
    REQUIRED_COLUMNS_NOTICE,
};
