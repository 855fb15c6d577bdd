//! Extra branches for packages that are meant to see each other without
//! declaring it: `<host>-plugin` packages next to their host, and the
//! configured peering offers.

use crate::config::PeeringDirectory;
use crate::dependency::{DependencyTree, NodeId};
use crate::resolver::satisfies;
use tracing::debug;

/// Host name of a package named like a plugin, `eslint` for `eslint-plugin-react`.
pub fn plugin_host(name: &str) -> Option<&str> {
    match name.find("-plugin") {
        Some(idx) if idx > 0 => Some(&name[..idx]),
        _ => None,
    }
}

/// Wherever a package depends on both a host and one of its plugins, make
/// the plugin a branch of that host. Returns the number of branches added.
pub fn link_plugins(tree: &mut DependencyTree) -> usize {
    let names: Vec<String> = tree.package_names().map(str::to_owned).collect();
    let mut linked = 0;
    for plugin in &names {
        let Some(host) = plugin_host(plugin) else { continue };
        if !tree.has_package(host) {
            debug!("Module '{}' looked like a plugin for '{}', but that wasn't found in the tree.", plugin, host);
            continue;
        }
        debug!("Found possible plugin '{}' for '{}'.", plugin, host);
        for dependant in tree.find_dependants(plugin) {
            // The host may have been a devDependency too far from the root.
            let Some(host_node) = tree.branch_by_name(dependant, host) else { continue };
            let Some(plugin_node) = tree.branch_by_name(dependant, plugin) else { continue };
            debug!(
                "'{}' wants '{}' for '{}'.",
                tree.node(dependant),
                tree.node(plugin_node),
                tree.node(host_node)
            );
            if tree.has_branch_for(host_node, plugin) {
                debug!("'{}' already depends on '{}'.", tree.node(host_node), plugin);
                continue;
            }
            tree.node_mut(host_node).branches.push(plugin_node);
            linked += 1;
        }
    }
    linked
}

/// Apply every peering offer: matching host versions get every matching peer
/// as a branch unless they already have a branch of that name.
pub fn link_peers(tree: &mut DependencyTree, peering: &PeeringDirectory) -> usize {
    let nodes = tree.cached_nodes();
    let mut linked = 0;
    for offer in peering.iter() {
        let hosts: Vec<NodeId> = nodes
            .iter()
            .copied()
            .filter(|&id| {
                let node = tree.node(id);
                node.name == offer.package_name && satisfies(&node.version, &offer.if_version_matches)
            })
            .collect();
        if hosts.is_empty() {
            continue;
        }
        let peers: Vec<NodeId> = nodes
            .iter()
            .copied()
            .filter(|&id| {
                let node = tree.node(id);
                offer
                    .peers
                    .iter()
                    .any(|peer| peer.matches(&node.name) && satisfies(&node.version, &peer.range))
            })
            .collect();
        for &host in &hosts {
            for &peer in &peers {
                if peer == host {
                    continue;
                }
                let peer_name = tree.node(peer).name.clone();
                if tree.has_branch_for(host, &peer_name) {
                    continue;
                }
                debug!("Offering '{}' to '{}' as a peer.", tree.node(peer), tree.node(host));
                tree.node_mut(host).branches.push(peer);
                linked += 1;
            }
        }
    }
    linked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerPattern;

    #[test]
    fn host_is_the_prefix_before_plugin() {
        assert_eq!(plugin_host("eslint-plugin-react"), Some("eslint"));
        assert_eq!(plugin_host("gulp-plugin"), Some("gulp"));
        assert_eq!(plugin_host("-plugin-x"), None);
        assert_eq!(plugin_host("react"), None);
    }

    fn peer(pattern: &str) -> PeerPattern {
        PeerPattern { pattern: glob::Pattern::new(pattern).unwrap(), range: "*".into() }
    }

    #[test]
    fn wildcard_patterns() {
        assert!(peer("eslint-plugin-*").matches("eslint-plugin-react"));
        assert!(peer("*").matches("anything"));
        assert!(peer("@babel/*-env").matches("@babel/preset-env"));
        assert!(peer("@babel/*").matches("@babel/core"));
        assert!(peer("a*b*c").matches("axxbyyc"));
        assert!(!peer("a*b*c").matches("acb"));
        assert!(!peer("eslint-plugin-*").matches("eslint"));
        assert!(peer("left-pad").matches("left-pad"));
        assert!(!peer("left-pad").matches("left-pads"));
    }
}
