//! API Service and optional Ingress for ECS.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::EcsCluster;
use crate::resources::ecs::{TLS_SECRET_NAME, app_labels, daemonset_labels, namespaced_meta};

/// Name of the Ingress exposing the API service.
pub const INGRESS_NAME: &str = "ecs-ingress";

/// Generate the API Service in front of the node pods.
pub fn generate_service(cluster: &EcsCluster) -> Service {
    let service = &cluster.spec.service;
    let mut metadata = namespaced_meta(cluster, &service.name, app_labels());
    if !service.annotations.is_empty() {
        metadata.annotations = Some(service.annotations.clone());
    }

    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some(service.r#type.clone()),
            selector: Some(daemonset_labels(cluster)),
            ports: Some(vec![ServicePort {
                name: Some(service.name.clone()),
                protocol: Some("TCP".to_string()),
                port: service.external_port,
                target_port: Some(IntOrString::Int(service.internal_port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the Ingress routing `spec.ingress.hostname` to the API Service.
pub fn generate_ingress(cluster: &EcsCluster) -> Ingress {
    let spec = &cluster.spec;
    let mut metadata = namespaced_meta(cluster, INGRESS_NAME, app_labels());
    if !spec.ingress.annotations.is_empty() {
        metadata.annotations = Some(spec.ingress.annotations.clone());
    }

    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: spec.service.name.clone(),
            port: Some(ServiceBackendPort {
                number: Some(spec.service.external_port),
                ..Default::default()
            }),
        }),
        ..Default::default()
    };

    let tls = spec.ingress.tls.then(|| {
        vec![IngressTLS {
            hosts: Some(vec![spec.ingress.hostname.clone()]),
            secret_name: Some(TLS_SECRET_NAME.to_string()),
        }]
    });

    Ingress {
        metadata,
        spec: Some(IngressSpec {
            tls,
            rules: Some(vec![IngressRule {
                host: Some(spec.ingress.hostname.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend,
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
