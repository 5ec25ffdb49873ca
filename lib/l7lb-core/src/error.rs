use l7lb_api::ServiceName;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("failed to update backends of {service} in {proxy}")]
    Publish {
        proxy: &'static str,
        service: ServiceName,
        #[source]
        source: anyhow::Error,
    },
}
