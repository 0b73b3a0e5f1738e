//! Server calls the pipeline depends on.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use vinvite_client::{ApiClient, ClientResult, GeneratedCharacter};
use vinvite_media::RemoteRemover;
use vinvite_models::{CharacterDescriptions, Photo};

/// Generation backend. Implemented by [`ApiClient`]; tests plug in fakes.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn extract(
        &self,
        photo: &Photo,
        cancel: &CancellationToken,
    ) -> ClientResult<CharacterDescriptions>;

    async fn generate(
        &self,
        photo: &Photo,
        descriptions: Option<&CharacterDescriptions>,
        cancel: &CancellationToken,
    ) -> ClientResult<GeneratedCharacter>;

    /// Server-side background removal used after the local model gives up.
    fn remote_remover(&self) -> Option<&dyn RemoteRemover> {
        None
    }
}

#[async_trait]
impl GenerationBackend for ApiClient {
    async fn extract(
        &self,
        photo: &Photo,
        cancel: &CancellationToken,
    ) -> ClientResult<CharacterDescriptions> {
        ApiClient::extract(self, photo, cancel).await
    }

    async fn generate(
        &self,
        photo: &Photo,
        descriptions: Option<&CharacterDescriptions>,
        cancel: &CancellationToken,
    ) -> ClientResult<GeneratedCharacter> {
        ApiClient::generate(self, photo, descriptions, cancel).await
    }

    fn remote_remover(&self) -> Option<&dyn RemoteRemover> {
        Some(self)
    }
}
