pub mod error;
pub mod images;
pub mod session;
pub mod store;

pub use error::StoreError;
pub use images::ImageStore;
pub use session::{EntryKind, GenerationEntry, SessionState};
pub use store::SessionStore;
