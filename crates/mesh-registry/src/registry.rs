//! The in-memory service registry.
//!
//! [`Registry`] maps hostnames to [`Service`]s and to the ordered list of
//! [`ServiceInstance`]s backing each service. It is additive-only: services
//! and instances can be added but never removed or replaced.
//!
//! Mutation takes `&mut self`. Once the registry is published behind an
//! `Arc`, holders only ever get `&Registry` and cannot mutate it.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;

use mesh_core::{HarnessError, Result};
use serde::Serialize;
use tracing::{debug, trace};

use crate::discovery::{cluster_name, listener_name, Direction};
use crate::model::{Port, Service, ServiceInstance, ServiceInstanceBuilder};

/// Summary counts for a registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of services.
    pub services: usize,
    /// Total number of ports across all services.
    pub ports: usize,
    /// Total number of instances across all services.
    pub instances: usize,
}

/// In-memory registry of services and their instances.
///
/// # Example
///
/// ```rust
/// use mesh_registry::{port_bundle, Registry, ServiceInstance};
///
/// let mut registry = Registry::new();
/// registry
///     .add_service("svc.example", "10.0.0.1".parse().unwrap(), port_bundle(0))
///     .unwrap();
/// registry
///     .add_instance(
///         "svc.example",
///         ServiceInstance::builder("10.2.0.1".parse().unwrap(), 2080, "http-main")
///             .label("version", "v1"),
///     )
///     .unwrap();
///
/// assert_eq!(registry.lookup("svc.example").unwrap().ports().len(), 6);
/// assert_eq!(registry.instances("svc.example").len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Registry {
    services: HashMap<String, Service>,
    instances: HashMap<String, Vec<ServiceInstance>>,
    /// Hostnames in insertion order, for deterministic iteration.
    order: Vec<String>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::DuplicateService`] if `hostname` is already present.
    /// - [`HarnessError::Configuration`] if two ports share a name.
    pub fn add_service(
        &mut self,
        hostname: impl Into<String>,
        address: IpAddr,
        ports: impl IntoIterator<Item = Port>,
    ) -> Result<&Service> {
        let hostname = hostname.into();
        if self.services.contains_key(&hostname) {
            return Err(HarnessError::DuplicateService { hostname });
        }

        let ports: Vec<Port> = ports.into_iter().collect();
        let mut names = BTreeSet::new();
        for port in &ports {
            if !names.insert(port.name()) {
                return Err(HarnessError::Configuration(format!(
                    "service {hostname} declares port name {:?} twice",
                    port.name()
                )));
            }
        }

        debug!(
            hostname = %hostname,
            address = %address,
            ports = ports.len(),
            "registered service"
        );

        self.order.push(hostname.clone());
        let service = self
            .services
            .entry(hostname.clone())
            .or_insert(Service::new(hostname, address, ports));
        Ok(service)
    }

    /// Add an instance to an existing service.
    ///
    /// The instance's service port name is resolved against the parent
    /// service's ports.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::UnknownService`] if `hostname` has no service. No
    ///   service is created implicitly.
    /// - [`HarnessError::UnknownPort`] if the service does not declare the
    ///   instance's port name.
    pub fn add_instance(&mut self, hostname: &str, instance: ServiceInstanceBuilder) -> Result<()> {
        let service = self
            .services
            .get(hostname)
            .ok_or_else(|| HarnessError::UnknownService {
                hostname: hostname.to_string(),
            })?;

        let port_name = instance.service_port_name();
        let port = service
            .port(port_name)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownPort {
                hostname: hostname.to_string(),
                port_name: port_name.to_string(),
            })?;

        let instance = instance.resolve(port);
        debug!(
            hostname,
            address = %instance.address(),
            port = instance.port(),
            version = instance.version().unwrap_or("-"),
            "registered instance"
        );

        self.instances
            .entry(hostname.to_string())
            .or_default()
            .push(instance);
        Ok(())
    }

    /// Look up a service by hostname.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NotFound`] if no service has this hostname.
    pub fn lookup(&self, hostname: &str) -> Result<&Service> {
        let found = self.services.get(hostname);
        trace!(hostname, hit = found.is_some(), "registry lookup");
        found.ok_or_else(|| HarnessError::NotFound {
            hostname: hostname.to_string(),
        })
    }

    /// Check whether a hostname is registered.
    #[must_use]
    pub fn contains(&self, hostname: &str) -> bool {
        self.services.contains_key(hostname)
    }

    /// Instances backing a service, in insertion order.
    ///
    /// Empty for unknown hostnames and for services without instances.
    #[must_use]
    pub fn instances(&self, hostname: &str) -> &[ServiceInstance] {
        self.instances.get(hostname).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Instances of a service carrying `key=value`.
    pub fn instances_labeled<'a>(
        &'a self,
        hostname: &str,
        key: &'a str,
        value: &'a str,
    ) -> impl Iterator<Item = &'a ServiceInstance> + 'a {
        self.instances(hostname)
            .iter()
            .filter(move |i| i.label(key) == Some(value))
    }

    /// Services in insertion order.
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.order.iter().filter_map(|h| self.services.get(h))
    }

    /// Number of services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether the registry has no services.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Summary counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            services: self.services.len(),
            ports: self.services.values().map(|s| s.ports().len()).sum(),
            instances: self.instances.values().map(Vec::len).sum(),
        }
    }

    /// Distinct `version` labels of a service's instances, sorted.
    #[must_use]
    pub fn version_subsets(&self, hostname: &str) -> BTreeSet<&str> {
        self.instances(hostname)
            .iter()
            .filter_map(ServiceInstance::version)
            .collect()
    }

    /// Outbound cluster names a control plane generates for every service port.
    ///
    /// Services sharing a port layout still yield one cluster per service.
    #[must_use]
    pub fn outbound_cluster_names(&self) -> Vec<String> {
        self.services()
            .flat_map(|svc| {
                svc.ports()
                    .iter()
                    .map(move |p| cluster_name(Direction::Outbound, "", p.name(), svc.hostname()))
            })
            .collect()
    }

    /// Subset cluster names for every service port and `version` label.
    #[must_use]
    pub fn subset_cluster_names(&self, hostname: &str) -> Vec<String> {
        let Ok(service) = self.lookup(hostname) else {
            return Vec::new();
        };
        let subsets = self.version_subsets(hostname);
        service
            .ports()
            .iter()
            .flat_map(|p| {
                subsets.iter().map(move |subset| {
                    cluster_name(Direction::Outbound, subset, p.name(), service.hostname())
                })
            })
            .collect()
    }

    /// Listener names for every distinct port number across all services.
    #[must_use]
    pub fn listener_names(&self) -> Vec<String> {
        let ports: BTreeSet<u16> = self
            .services
            .values()
            .flat_map(|s| s.ports().iter().map(Port::number))
            .collect();
        ports.into_iter().map(listener_name).collect()
    }

    /// Serializable view of the whole registry, services in insertion order.
    #[must_use]
    pub fn export(&self) -> RegistryExport<'_> {
        RegistryExport {
            services: self
                .services()
                .map(|service| ExportedService {
                    service,
                    instances: self.instances(service.hostname()),
                })
                .collect(),
        }
    }
}

/// Serializable registry view handed to an out-of-process control plane.
#[derive(Debug, Serialize)]
pub struct RegistryExport<'a> {
    services: Vec<ExportedService<'a>>,
}

#[derive(Debug, Serialize)]
struct ExportedService<'a> {
    #[serde(flatten)]
    service: &'a Service,
    instances: &'a [ServiceInstance],
}
