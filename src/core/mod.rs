pub mod engine;
pub mod exclude;
pub mod manifest;
pub mod reconciler;
pub mod rules;
pub mod scanner;
pub mod uploader;

pub use engine::{SyncConfig, SyncEngine, SyncReport, SyncStatus, DEFAULT_MANIFEST_KEY};
pub use exclude::ExcludeMatcher;
pub use manifest::{ManifestEntry, ManifestFetch, ManifestStore, RemoteManifest, UploadedObject};
pub use reconciler::{DeleteOutcome, Reconciler};
pub use rules::{
    fingerprint_headers, HeaderMatch, HeaderRule, HeaderRuleMatcher, HeaderSet, RuleDiagnostic,
};
pub use scanner::{calculate_hash, FileRecord, FileScanner};
pub use uploader::{UploadConfig, UploadCoordinator, UploadOutcome};
