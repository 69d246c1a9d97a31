//! Test fixtures and builder patterns for NautilusCluster and EcsCluster.

use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use nautilus_operator::crd::{
    BookkeeperSpec, CsiSpec, EcsCluster, EcsClusterSpec, ImageSpec, NautilusCluster,
    NautilusClusterSpec, NautilusSpec,
};

/// Builder for creating NautilusCluster test fixtures.
///
/// # Example
/// ```ignore
/// let cluster = NautilusClusterBuilder::new("example")
///     .namespace("streaming")
///     .bookies(3)
///     .nodes(2)
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct NautilusClusterBuilder {
    name: String,
    namespace: Option<String>,
    zookeeper_uri: String,
    bookkeeper: Option<BookkeeperSpec>,
    nautilus: Option<NautilusSpec>,
    generation: Option<i64>,
    uid: Option<String>,
}

impl NautilusClusterBuilder {
    /// Create a new builder with the given resource name and no spec fields set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            zookeeper_uri: String::new(),
            bookkeeper: None,
            nautilus: None,
            generation: None,
            uid: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn zookeeper_uri(mut self, uri: impl Into<String>) -> Self {
        self.zookeeper_uri = uri.into();
        self
    }

    /// Set the number of bookies.
    pub fn bookies(mut self, replicas: i32) -> Self {
        self.bookkeeper.get_or_insert_with(Default::default).replicas = replicas;
        self
    }

    /// Set the number of Nautilus nodes.
    pub fn nodes(mut self, replicas: i32) -> Self {
        self.nautilus.get_or_insert_with(Default::default).node_replicas = replicas;
        self
    }

    /// Set the number of Nautilus controllers.
    pub fn controllers(mut self, replicas: i32) -> Self {
        self.nautilus
            .get_or_insert_with(Default::default)
            .controller_replicas = replicas;
        self
    }

    /// Set the Nautilus image tag.
    pub fn version(mut self, tag: impl Into<String>) -> Self {
        let nautilus = self.nautilus.get_or_insert_with(Default::default);
        nautilus.image.get_or_insert_with(ImageSpec::default).tag = tag.into();
        self
    }

    pub fn bookkeeper_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.bookkeeper
            .get_or_insert_with(Default::default)
            .options
            .get_or_insert_with(Default::default)
            .insert(key.into(), value.into());
        self
    }

    pub fn generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn build(self) -> NautilusCluster {
        NautilusCluster {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: self.namespace,
                generation: self.generation,
                uid: self.uid,
                ..Default::default()
            },
            spec: NautilusClusterSpec {
                zookeeper_uri: self.zookeeper_uri,
                bookkeeper: self.bookkeeper,
                nautilus: self.nautilus,
            },
            status: None,
        }
    }
}

/// Builder for creating EcsCluster test fixtures.
#[derive(Clone, Debug, Default)]
pub struct EcsClusterBuilder {
    name: String,
    namespace: Option<String>,
    spec: EcsClusterSpec,
    uid: Option<String>,
}

impl EcsClusterBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Namespace where node resources are created.
    pub fn resource_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.spec.namespace = namespace.into();
        self
    }

    pub fn join(mut self, join: impl Into<String>) -> Self {
        self.spec.join = join.into();
        self
    }

    /// Enable CSI with every credential secret.
    pub fn csi(mut self) -> Self {
        self.spec.csi = CsiSpec {
            enable: true,
            enable_provision_creds: true,
            enable_controller_publish_creds: true,
            enable_node_publish_creds: true,
            ..Default::default()
        };
        self
    }

    pub fn toleration(mut self, key: &str, operator: &str, value: &str) -> Self {
        self.spec.tolerations.push(Toleration {
            key: Some(key.to_string()),
            operator: Some(operator.to_string()),
            value: Some(value.to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Default::default()
        });
        self
    }

    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn build(self) -> EcsCluster {
        EcsCluster {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: self.namespace,
                uid: self.uid,
                ..Default::default()
            },
            spec: self.spec,
            status: None,
        }
    }
}

/// A NautilusCluster with nothing set except its identity.
pub fn minimal_nautilus(name: &str) -> NautilusCluster {
    NautilusClusterBuilder::new(name).build()
}

/// A NautilusCluster with common test defaults.
pub fn test_nautilus(name: &str, namespace: &str) -> NautilusCluster {
    NautilusClusterBuilder::new(name)
        .namespace(namespace)
        .generation(1)
        .uid(format!("test-uid-{}", name))
        .build()
}

/// An EcsCluster with common test defaults.
pub fn test_ecs(name: &str, namespace: &str) -> EcsCluster {
    EcsClusterBuilder::new(name)
        .namespace(namespace)
        .uid(format!("test-uid-{}", name))
        .build()
}
