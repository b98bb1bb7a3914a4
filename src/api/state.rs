//! Shared serve-time state

use std::sync::Arc;

use crate::api::urls::UrlResolver;
use crate::assets::fetch::AssetFetcher;
use crate::snapshot::store::SnapshotStore;

pub struct ApiState {
    pub store: SnapshotStore,
    pub urls: UrlResolver,
    pub fetcher: Arc<AssetFetcher>,
    pub allowed_origins: Vec<String>,
}

pub type SharedState = Arc<ApiState>;
