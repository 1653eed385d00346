//! The Provider Client trait: the seam between this service and the remote
//! messaging REST API. Everything upstream programs against this trait;
//! [`crate::http::HttpProviderClient`] is the production implementation.

use async_trait::async_trait;

use crate::{
    error::Result,
    types::{MediaInfo, Outbound, ProviderAccount, SentMessage, Template, TemplateSend},
};

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Send a free-form message (text, media, or reaction).
    async fn send_message(&self, account: &ProviderAccount, message: Outbound)
    -> Result<SentMessage>;

    /// Send a pre-approved template with resolved variables.
    async fn send_template(
        &self,
        account: &ProviderAccount,
        template: TemplateSend,
    ) -> Result<SentMessage>;

    /// Fetch the live template catalog for the account's business.
    async fn fetch_templates(&self, account: &ProviderAccount) -> Result<Vec<Template>>;

    /// Resolve a media id to its short-lived download URL and metadata.
    async fn fetch_media_info(&self, account: &ProviderAccount, media_id: &str)
    -> Result<MediaInfo>;

    /// Download media bytes from a URL returned by [`Self::fetch_media_info`].
    async fn download_media(&self, account: &ProviderAccount, url: &str) -> Result<Vec<u8>>;
}
