use thiserror::Error;

pub type Result<T> = std::result::Result<T, GwhoError>;

#[derive(Error, Debug)]
pub enum GwhoError {
    #[error("Git repository error: {0}")]
    GitRepo(String),
    #[error("Data source error: {0}")]
    DataSource(String),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Object find error: {0}")]
    ObjectFind(#[from] Box<gix::object::find::existing::Error>),
    #[error("Commit error: {0}")]
    Commit(#[from] Box<gix::object::commit::Error>),
    #[error("Object find with conversion error: {0}")]
    ObjectFindConv(#[from] Box<gix::object::find::existing::with_conversion::Error>),
    #[error("Object decode error: {0}")]
    ObjectDecode(#[from] Box<gix::objs::decode::Error>),
    #[error("Diff tree to tree error: {0}")]
    DiffTreeToTree(#[from] Box<gix::repository::diff_tree_to_tree::Error>),
    #[error("Git discover error: {0}")]
    GitDiscover(#[from] Box<gix::discover::Error>),
}

// Unboxed gix errors convert into their boxed variants.
impl From<gix::object::find::existing::Error> for GwhoError {
    fn from(err: gix::object::find::existing::Error) -> Self {
        GwhoError::ObjectFind(Box::new(err))
    }
}

impl From<gix::object::commit::Error> for GwhoError {
    fn from(err: gix::object::commit::Error) -> Self {
        GwhoError::Commit(Box::new(err))
    }
}

impl From<gix::object::find::existing::with_conversion::Error> for GwhoError {
    fn from(err: gix::object::find::existing::with_conversion::Error) -> Self {
        GwhoError::ObjectFindConv(Box::new(err))
    }
}

impl From<gix::objs::decode::Error> for GwhoError {
    fn from(err: gix::objs::decode::Error) -> Self {
        GwhoError::ObjectDecode(Box::new(err))
    }
}

impl From<gix::repository::diff_tree_to_tree::Error> for GwhoError {
    fn from(err: gix::repository::diff_tree_to_tree::Error) -> Self {
        GwhoError::DiffTreeToTree(Box::new(err))
    }
}

impl From<gix::discover::Error> for GwhoError {
    fn from(err: gix::discover::Error) -> Self {
        GwhoError::GitDiscover(Box::new(err))
    }
}
