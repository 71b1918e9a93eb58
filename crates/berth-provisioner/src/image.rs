use berth_common::{CloudContext, ImageDescriptor, PullPolicy};

use crate::error::ProvisionError;
use crate::runtime::ContainerRuntime;

/// Make sure the descriptor's image is present on the runtime, pulling it if
/// the pull policy allows.
pub async fn ensure_image(
    runtime: &dyn ContainerRuntime,
    cloud: &CloudContext,
    descriptor: &ImageDescriptor,
) -> Result<(), ProvisionError> {
    let image = &descriptor.image;

    let present = runtime
        .inspect_image(image)
        .await
        .map_err(|source| ProvisionError::ImagePullFailed {
            image: image.clone(),
            source: source.context("inspecting image"),
        })?
        .is_some();

    tracing::debug!(%image, present, policy=?descriptor.pull_policy, "resolved image presence");

    match (present, descriptor.pull_policy) {
        (true, PullPolicy::IfMissing | PullPolicy::Never) => return Ok(()),
        (false, PullPolicy::Never) => {
            return Err(ProvisionError::ImageUnavailable {
                image: image.clone(),
                cloud: cloud.name.clone(),
            });
        }
        _ => {}
    }

    tracing::info!(%image, cloud=%cloud.name, "pulling image");
    runtime
        .pull_image(image)
        .await
        .map_err(|source| ProvisionError::ImagePullFailed {
            image: image.clone(),
            source,
        })?;
    tracing::info!(%image, "image pulled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;

    fn cloud() -> CloudContext {
        CloudContext::new("local", "http://ci/agent")
    }

    fn descriptor(policy: PullPolicy) -> ImageDescriptor {
        ImageDescriptor::new("jdk17", "jenkins/agent:jdk17", "/home/jenkins").with_pull_policy(policy)
    }

    #[tokio::test]
    async fn test_present_if_missing_skips_pull() {
        let rt = FakeRuntime::with_image("jenkins/agent:jdk17");
        ensure_image(&rt, &cloud(), &descriptor(PullPolicy::IfMissing)).await.unwrap();
        assert_eq!(rt.pull_count(), 0);
    }

    #[tokio::test]
    async fn test_present_always_pulls() {
        let rt = FakeRuntime::with_image("jenkins/agent:jdk17");
        ensure_image(&rt, &cloud(), &descriptor(PullPolicy::Always)).await.unwrap();
        assert_eq!(rt.pull_count(), 1);
    }

    #[tokio::test]
    async fn test_absent_never_fails_without_pull() {
        let rt = FakeRuntime::default();
        let err = ensure_image(&rt, &cloud(), &descriptor(PullPolicy::Never))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ImageUnavailable { .. }), "{err:?}");
        assert_eq!(rt.pull_count(), 0);
    }

    #[tokio::test]
    async fn test_absent_if_missing_pulls() {
        let rt = FakeRuntime::default();
        ensure_image(&rt, &cloud(), &descriptor(PullPolicy::IfMissing)).await.unwrap();
        assert_eq!(rt.pull_count(), 1);
        assert!(rt.has_image("jenkins/agent:jdk17"));
    }

    #[tokio::test]
    async fn test_pull_failure_keeps_cause() {
        let rt = FakeRuntime::default();
        rt.fail_pull("manifest unknown");
        let err = ensure_image(&rt, &cloud(), &descriptor(PullPolicy::IfMissing))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "image_pull_failed");
        assert!(err.cause_chain().contains("manifest unknown"));
    }

    #[tokio::test]
    async fn test_inspect_failure_is_pull_failure() {
        let rt = FakeRuntime::default();
        rt.fail_inspect("Cannot connect to the Docker daemon");
        let err = ensure_image(&rt, &cloud(), &descriptor(PullPolicy::IfMissing))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "image_pull_failed");
        let chain = err.cause_chain();
        assert!(chain.contains("inspecting image"), "{chain}");
        assert!(chain.contains("Cannot connect to the Docker daemon"), "{chain}");
        assert_eq!(rt.pull_count(), 0);
    }
}
