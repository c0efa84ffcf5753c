mod deleted;
mod object_store;
mod share_path;
mod traits;

pub use deleted::{parse_deleted_listing, DeletedCasefileRecord};
pub use object_store::{
    blob_hash, canonical_encoding, hash_of, CasefileAuthors, GitCasefileStore, SharedCasefile,
    SharedCasefileGroup,
};
pub use share_path::{generate_instance_id, SharePath, INSTANCE_ID_LEN};
pub use traits::CasefileStore;
