//! Compiled-in table of the resource kinds the console tracks live.
//!
//! This table is the single extension point for synchronizing a new kind:
//! add a row here and the registry, the engine, and the published readers
//! pick it up. Kinds the backend emits that are not listed are dropped by
//! the engine.

/// How a partition is published to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingSpec {
    /// One flat collection, keyed by namespace/name.
    Direct,
    /// Dictionary of collections grouped by the record's namespace,
    /// deduplicated by namespace/name within each group. Used for kinds
    /// whose natural consumption shape is "records per cluster namespace".
    ByNamespace,
}

/// One tracked kind: API group+version, Kind, and its binding.
#[derive(Debug, Clone, Copy)]
pub struct KindSpec {
    pub group_version: &'static str,
    pub kind: &'static str,
    pub binding: BindingSpec,
}

const fn direct(group_version: &'static str, kind: &'static str) -> KindSpec {
    KindSpec { group_version, kind, binding: BindingSpec::Direct }
}

const fn by_namespace(group_version: &'static str, kind: &'static str) -> KindSpec {
    KindSpec { group_version, kind, binding: BindingSpec::ByNamespace }
}

/// Every kind the console keeps synchronized, in table order.
static TRACKED_KINDS: &[KindSpec] = &[
    // core
    direct("v1", "Namespace"),
    direct("v1", "Secret"),
    direct("v1", "ConfigMap"),
    direct("certificates.k8s.io/v1", "CertificateSigningRequest"),
    // cluster lifecycle
    direct("cluster.open-cluster-management.io/v1", "ManagedCluster"),
    direct("cluster.open-cluster-management.io/v1beta1", "Placement"),
    direct("cluster.open-cluster-management.io/v1beta1", "PlacementDecision"),
    direct("cluster.open-cluster-management.io/v1beta1", "ClusterCurator"),
    direct("cluster.open-cluster-management.io/v1beta2", "ManagedClusterSet"),
    direct("cluster.open-cluster-management.io/v1beta2", "ManagedClusterSetBinding"),
    by_namespace("internal.open-cluster-management.io/v1beta1", "ManagedClusterInfo"),
    by_namespace("addon.open-cluster-management.io/v1alpha1", "ManagedClusterAddOn"),
    direct("addon.open-cluster-management.io/v1alpha1", "ClusterManagementAddOn"),
    direct("agent.open-cluster-management.io/v1", "KlusterletAddonConfig"),
    direct("view.open-cluster-management.io/v1beta1", "ManagedClusterView"),
    direct("action.open-cluster-management.io/v1beta1", "ManagedClusterAction"),
    direct("imageregistry.open-cluster-management.io/v1alpha1", "ManagedClusterImageRegistry"),
    // hive provisioning
    direct("hive.openshift.io/v1", "ClusterDeployment"),
    direct("hive.openshift.io/v1", "ClusterPool"),
    direct("hive.openshift.io/v1", "ClusterClaim"),
    direct("hive.openshift.io/v1", "ClusterProvision"),
    direct("hive.openshift.io/v1", "ClusterDeprovision"),
    direct("hive.openshift.io/v1", "ClusterImageSet"),
    direct("hive.openshift.io/v1", "MachinePool"),
    direct("extensions.hive.openshift.io/v1beta1", "AgentClusterInstall"),
    // hosted control planes
    direct("hypershift.openshift.io/v1beta1", "HostedCluster"),
    direct("hypershift.openshift.io/v1beta1", "NodePool"),
    // central infrastructure management
    direct("agent-install.openshift.io/v1beta1", "InfraEnv"),
    direct("agent-install.openshift.io/v1beta1", "Agent"),
    direct("agent-install.openshift.io/v1beta1", "NMStateConfig"),
    direct("metal3.io/v1alpha1", "BareMetalHost"),
    // governance
    direct("policy.open-cluster-management.io/v1", "Policy"),
    direct("policy.open-cluster-management.io/v1", "PlacementBinding"),
    direct("policy.open-cluster-management.io/v1beta1", "PolicyAutomation"),
    direct("policy.open-cluster-management.io/v1beta1", "PolicySet"),
    by_namespace("wgpolicyk8s.io/v1alpha2", "PolicyReport"),
    // application lifecycle
    direct("app.k8s.io/v1beta1", "Application"),
    direct("apps.open-cluster-management.io/v1", "Channel"),
    direct("apps.open-cluster-management.io/v1", "Subscription"),
    direct("apps.open-cluster-management.io/v1", "PlacementRule"),
    direct("apps.open-cluster-management.io/v1alpha1", "GitOpsCluster"),
    direct("argoproj.io/v1alpha1", "Application"),
    direct("argoproj.io/v1alpha1", "ApplicationSet"),
    // discovery
    direct("discovery.open-cluster-management.io/v1", "DiscoveredCluster"),
    direct("discovery.open-cluster-management.io/v1", "DiscoveryConfig"),
    // operators and add-ons
    direct("operator.open-cluster-management.io/v1", "MultiClusterHub"),
    direct("multicluster.openshift.io/v1", "MultiClusterEngine"),
    direct("submarineraddon.open-cluster-management.io/v1alpha1", "SubmarinerConfig"),
    direct("search.open-cluster-management.io/v1alpha1", "Search"),
    direct("tower.ansible.com/v1alpha1", "AnsibleJob"),
];

pub fn tracked_kinds() -> &'static [KindSpec] {
    TRACKED_KINDS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_no_duplicate_keys() {
        let mut seen = std::collections::HashSet::new();
        for spec in tracked_kinds() {
            assert!(
                seen.insert((spec.group_version, spec.kind)),
                "duplicate table row: {}/{}",
                spec.group_version,
                spec.kind
            );
        }
    }

    #[test]
    fn grouped_kinds_are_present() {
        let grouped: Vec<_> = tracked_kinds()
            .iter()
            .filter(|s| s.binding == BindingSpec::ByNamespace)
            .map(|s| s.kind)
            .collect();
        assert_eq!(grouped, vec!["ManagedClusterInfo", "ManagedClusterAddOn", "PolicyReport"]);
    }
}
