pub mod downloads;
pub mod mailer;
pub mod sync;

pub use downloads::DownloadService;
pub use mailer::Mailer;
pub use sync::{ContentSync, SyncReport};
