pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod guard;
pub mod object_store;
pub mod session;
pub mod upload;

pub use api::{AccountApi, HttpAccountApi};
pub use config::{load_settings, ConfigError, Settings, StorageSettings};
pub use error::ClientError;
pub use guard::{Route, RouteDecision, RouteGuard};
pub use object_store::HttpObjectStore;
pub use session::{reduce, ActionKind, SessionEvent, SessionSnapshot, SessionStatus, SessionStore};
pub use upload::{
    ObjectStore, UploadCoordinator, UploadError, UploadEvent, UploadPolicy, UploadProgress,
    UploadRequest, UploadTask,
};
