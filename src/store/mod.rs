//! Storage collaborators: the record store (document database) and the
//! search store (bulk-indexed search engine) the rest of the crate talks to
//! only through narrow traits, so the core logic never depends on a live
//! Mongo or Elasticsearch-alike deployment to be tested.

pub mod record_store;
pub mod search_store;

pub use record_store::{InMemoryRecordStore, MongoRecordStore, RecordStore, SharedRecordStore};
pub use search_store::{
    BulkResponse, ElasticsearchStore, InMemorySearchStore, SearchStore, SharedSearchStore,
};
