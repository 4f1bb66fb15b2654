mod document;
mod error;
mod key;
mod record;
mod shell;
mod store;

pub use document::StateDocument;
pub use error::StoreError;
pub use key::{Section, StateKey};
pub use record::SessionRecord;
pub use shell::{shell_join, shell_quote, shell_split, ShellSplitError};
pub use store::{StateStore, StoreTransaction};
