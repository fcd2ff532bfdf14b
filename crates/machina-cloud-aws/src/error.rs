//! SDK error mapping

use aws_sdk_ec2::config::http::HttpResponse;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use machina_cloud::CloudError;

/// Maps an SDK failure onto the facade's error taxonomy.
///
/// Service errors are classified by HTTP status and error code; timeouts and
/// dispatch failures are transport errors and always retryable.
pub fn sdk_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::ServiceError(context) => {
            let status = context.raw().status().as_u16();
            let service_err = context.err();
            CloudError::classify(
                operation,
                Some(status),
                service_err.code(),
                service_err.message().unwrap_or_default(),
            )
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => CloudError::Transport {
            operation: operation.to_string(),
            message: DisplayErrorContext(&err).to_string(),
        },
        SdkError::ConstructionFailure(_) => CloudError::InvalidRequest(format!(
            "{}: {}",
            operation,
            DisplayErrorContext(&err)
        )),
        _ => {
            let status = err.raw_response().map(|r| r.status().as_u16());
            CloudError::classify(
                operation,
                status,
                err.code(),
                DisplayErrorContext(&err).to_string(),
            )
        }
    }
}

/// Builder validation failures (missing required members).
pub fn build_error(operation: &str, err: impl std::fmt::Display) -> CloudError {
    CloudError::InvalidRequest(format!("{}: {}", operation, err))
}
