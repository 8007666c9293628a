//! Kubernetes client and `ApiResource` helpers using kube-rs

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};

use crate::Error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for `kubeconfig`, or the inferred environment when `None`
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// `ApiResource` for an apiVersion and kind, without discovery
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into (group, version); the core group is empty
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Known pluralizations that the fallback rules get wrong or that are worth pinning
const KIND_PLURALS: &[(&str, &str)] = &[
    // Composition engine types
    ("compositeresourcedefinition", "compositeresourcedefinitions"),
    ("composition", "compositions"),
    ("compositionrevision", "compositionrevisions"),
    ("environmentconfig", "environmentconfigs"),
    // Package manager types
    ("provider", "providers"),
    ("providerrevision", "providerrevisions"),
    ("providerconfig", "providerconfigs"),
    ("configuration", "configurations"),
    ("configurationrevision", "configurationrevisions"),
    ("function", "functions"),
    ("deploymentruntimeconfig", "deploymentruntimeconfigs"),
    // Core types with irregular plurals
    ("endpoints", "endpoints"),
    ("ingress", "ingresses"),
    ("customresourcedefinition", "customresourcedefinitions"),
];

/// Resource plural for `kind`
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pluralize_kind() {
        assert_eq!(pluralize_kind("Deployment"), "deployments");
        assert_eq!(pluralize_kind("Policy"), "policies");
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
        assert_eq!(pluralize_kind("Namespace"), "namespaces");
        assert_eq!(
            pluralize_kind("CompositeResourceDefinition"),
            "compositeresourcedefinitions"
        );
        assert_eq!(pluralize_kind("XRobot"), "xrobots");
        assert_eq!(pluralize_kind("Robot"), "robots");
        assert_eq!(pluralize_kind("ProviderConfig"), "providerconfigs");
        assert_eq!(pluralize_kind("Gateway"), "gateways");
    }

    #[test]
    fn test_parse_api_version_with_group() {
        let (group, version) = parse_api_version("pkg.crossplane.io/v1");
        assert_eq!(group, "pkg.crossplane.io");
        assert_eq!(version, "v1");
    }

    #[test]
    fn test_parse_api_version_core() {
        let (group, version) = parse_api_version("v1");
        assert_eq!(group, "");
        assert_eq!(version, "v1");
    }

    #[test]
    fn test_build_api_resource_for_claim() {
        let ar = build_api_resource("dummy.crossplane.io/v1alpha1", "Robot");
        assert_eq!(ar.group, "dummy.crossplane.io");
        assert_eq!(ar.version, "v1alpha1");
        assert_eq!(ar.kind, "Robot");
        assert_eq!(ar.api_version, "dummy.crossplane.io/v1alpha1");
        assert_eq!(ar.plural, "robots");
    }
}
