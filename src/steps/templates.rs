//! Scripts and manifests compiled into the binary

/// Installs the container runtime and pinned kube packages on a host
pub static PREREQUISITES_SCRIPT: &str = include_str!("templates/prerequisites.sh.j2");

/// machine-controller CRDs, RBAC and deployment
pub static MACHINE_CONTROLLER_MANIFEST: &str = include_str!("templates/machine-controller.yaml.j2");
