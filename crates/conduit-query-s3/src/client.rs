use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client;
use conduit_query::ReaderConfig;
use tracing::debug;

/// Connection settings for the SDK client
#[derive(Debug, Clone, Default)]
pub(crate) struct ClientSettings {
    pub region_name: Option<String>,
    pub aws_profile: Option<String>,
    /// Custom endpoint for S3-compatible stores
    pub endpoint_url: Option<String>,
}

impl ClientSettings {
    pub fn from_config(config: &ReaderConfig) -> Self {
        Self {
            region_name: config.get_str("region_name"),
            aws_profile: config.get_str("aws_profile"),
            endpoint_url: config.get_str("endpoint_url"),
        }
    }

    pub async fn build(&self) -> conduit_query::Result<Client> {
        debug!("Creating S3 client (region: {:?})", self.region_name);

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &self.region_name {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &self.aws_profile {
            loader = loader.profile_name(profile);
        }
        if let Some(endpoint) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if self.endpoint_url.is_some() {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        debug!("S3 client created successfully");
        Ok(Client::from_conf(s3_config_builder.build()))
    }
}
