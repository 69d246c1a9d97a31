//! Secrets for ECS: API credentials, TLS material and CSI credentials.
//!
//! Values are copied from the Secret referenced by `spec.secretRefName` /
//! `spec.secretRefNamespace` when present.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;

use crate::controller::error::{Error, Result};
use crate::crd::EcsCluster;
use crate::resources::ecs::{
    CSI_CONTROLLER_PUBLISH_SECRET_NAME, CSI_NODE_PUBLISH_SECRET_NAME, CSI_PROVISIONER_SECRET_NAME,
    CSI_SECRET_NAMES, INIT_SECRET_NAME, TLS_SECRET_NAME, app_labels, namespaced_meta,
};

const DEFAULT_USERNAME: &str = "ecs";
const DEFAULT_PASSWORD: &str = "ecs";

const API_USERNAME_KEY: &str = "apiUsername";
const API_PASSWORD_KEY: &str = "apiPassword";
const TLS_CERT_KEY: &str = "tls.crt";
const TLS_KEY_KEY: &str = "tls.key";

/// Secret type of the CSI credential secrets.
pub const ECS_SECRET_TYPE: &str = "kubernetes.io/ecs";
const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// The user-provided credentials Secret, if any.
#[derive(Clone, Copy, Debug, Default)]
pub struct CredentialSource<'a> {
    secret: Option<&'a Secret>,
}

impl<'a> CredentialSource<'a> {
    pub fn new(secret: Option<&'a Secret>) -> Self {
        Self { secret }
    }

    fn get(&self, key: &str) -> Option<&'a ByteString> {
        self.secret
            .and_then(|s| s.data.as_ref())
            .and_then(|data| data.get(key))
            .filter(|value| !value.0.is_empty())
    }

    fn get_or(&self, key: &str, default: &str) -> ByteString {
        self.get(key)
            .cloned()
            .unwrap_or_else(|| ByteString(default.as_bytes().to_vec()))
    }

    fn describe(&self) -> String {
        self.secret
            .map(|s| {
                format!(
                    "{}/{}",
                    s.metadata.namespace.as_deref().unwrap_or_default(),
                    s.metadata.name.as_deref().unwrap_or_default()
                )
            })
            .unwrap_or_else(|| "<no secret reference>".to_string())
    }
}

fn credentials_secret(
    cluster: &EcsCluster,
    name: &str,
    type_: &str,
    username: ByteString,
    password: ByteString,
) -> Secret {
    Secret {
        metadata: namespaced_meta(cluster, name, app_labels()),
        type_: Some(type_.to_string()),
        data: Some(BTreeMap::from([
            ("username".to_string(), username),
            ("password".to_string(), password),
        ])),
        ..Default::default()
    }
}

/// Admin credentials the node containers start with.
pub fn generate_init_secret(cluster: &EcsCluster, source: CredentialSource<'_>) -> Secret {
    credentials_secret(
        cluster,
        INIT_SECRET_NAME,
        "Opaque",
        source.get_or(API_USERNAME_KEY, DEFAULT_USERNAME),
        source.get_or(API_PASSWORD_KEY, DEFAULT_PASSWORD),
    )
}

/// TLS material for the ingress. Both the certificate and key must be present.
pub fn generate_tls_secret(cluster: &EcsCluster, source: CredentialSource<'_>) -> Result<Secret> {
    let missing = |key: &str| Error::MissingField(format!("{key} in secret {}", source.describe()));
    let cert = source.get(TLS_CERT_KEY).ok_or_else(|| missing(TLS_CERT_KEY))?;
    let key = source.get(TLS_KEY_KEY).ok_or_else(|| missing(TLS_KEY_KEY))?;

    Ok(Secret {
        metadata: namespaced_meta(cluster, TLS_SECRET_NAME, app_labels()),
        type_: Some(TLS_SECRET_TYPE.to_string()),
        data: Some(BTreeMap::from([
            (TLS_CERT_KEY.to_string(), cert.clone()),
            (TLS_KEY_KEY.to_string(), key.clone()),
        ])),
        ..Default::default()
    })
}

/// One credential Secret per CSI operation that requires credentials.
pub fn generate_csi_secrets(cluster: &EcsCluster, source: CredentialSource<'_>) -> Vec<Secret> {
    let csi = &cluster.spec.csi;
    [
        (
            csi.enable_provision_creds,
            CSI_PROVISIONER_SECRET_NAME,
            "csiProvisionUsername",
            "csiProvisionPassword",
        ),
        (
            csi.enable_controller_publish_creds,
            CSI_CONTROLLER_PUBLISH_SECRET_NAME,
            "csiControllerPublishUsername",
            "csiControllerPublishPassword",
        ),
        (
            csi.enable_node_publish_creds,
            CSI_NODE_PUBLISH_SECRET_NAME,
            "csiNodePublishUsername",
            "csiNodePublishPassword",
        ),
    ]
    .into_iter()
    .filter(|(enabled, ..)| *enabled)
    .map(|(_, name, username_key, password_key)| {
        credentials_secret(
            cluster,
            name,
            ECS_SECRET_TYPE,
            source.get_or(username_key, DEFAULT_USERNAME),
            source.get_or(password_key, DEFAULT_PASSWORD),
        )
    })
    .collect()
}

/// CSI credential Secrets that are not among `wanted` and should be removed.
pub fn stale_csi_secrets(wanted: &[Secret]) -> Vec<&'static str> {
    CSI_SECRET_NAMES
        .iter()
        .copied()
        .filter(|name| !wanted.iter().any(|s| s.metadata.name.as_deref() == Some(*name)))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::crd::{CsiSpec, EcsClusterSpec};
    use crate::resources::ecs::test_cluster;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn reference(entries: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("ecs-api".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn value(secret: &Secret, key: &str) -> String {
        String::from_utf8(secret.data.as_ref().unwrap()[key].0.clone()).unwrap()
    }

    #[test]
    fn test_init_secret_defaults() {
        let cluster = test_cluster("default", EcsClusterSpec::default());
        let secret = generate_init_secret(&cluster, CredentialSource::default());
        assert_eq!(secret.metadata.name.as_deref(), Some("init-secret"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("ecs"));
        assert_eq!(value(&secret, "username"), "ecs");
        assert_eq!(value(&secret, "password"), "ecs");
    }

    #[test]
    fn test_init_secret_from_reference() {
        let cluster = test_cluster("default", EcsClusterSpec::default());
        let reference = reference(&[("apiUsername", "admin"), ("apiPassword", "s3cret")]);
        let secret = generate_init_secret(&cluster, CredentialSource::new(Some(&reference)));
        assert_eq!(value(&secret, "username"), "admin");
        assert_eq!(value(&secret, "password"), "s3cret");
    }

    #[test]
    fn test_tls_secret_requires_cert_and_key() {
        let cluster = test_cluster("default", EcsClusterSpec::default());
        let partial = reference(&[("tls.crt", "CERT")]);
        let err = generate_tls_secret(&cluster, CredentialSource::new(Some(&partial))).unwrap_err();
        assert!(err.to_string().contains("tls.key"));

        let full = reference(&[("tls.crt", "CERT"), ("tls.key", "KEY")]);
        let secret = generate_tls_secret(&cluster, CredentialSource::new(Some(&full))).unwrap();
        assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/tls"));
        assert_eq!(value(&secret, "tls.key"), "KEY");
    }

    #[test]
    fn test_csi_secrets_follow_flags() {
        let cluster = test_cluster(
            "default",
            EcsClusterSpec {
                csi: CsiSpec {
                    enable: true,
                    enable_controller_publish_creds: true,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let reference = reference(&[("csiControllerPublishUsername", "pub")]);
        let secrets = generate_csi_secrets(&cluster, CredentialSource::new(Some(&reference)));
        assert_eq!(secrets.len(), 1);
        assert_eq!(
            secrets[0].metadata.name.as_deref(),
            Some("csi-controller-publish-secret")
        );
        assert_eq!(secrets[0].type_.as_deref(), Some(ECS_SECRET_TYPE));
        assert_eq!(value(&secrets[0], "username"), "pub");
        assert_eq!(value(&secrets[0], "password"), "ecs");

        assert_eq!(
            stale_csi_secrets(&secrets),
            vec!["csi-provisioner-secret", "csi-node-publish-secret"]
        );
        assert_eq!(stale_csi_secrets(&[]), CSI_SECRET_NAMES.to_vec());
    }
}
