//! Ingress action, used where the Route kind is unavailable

use atlasmap_common::validate_hostname;
use k8s_openapi::api::networking::v1::{Ingress, IngressRule};
use tracing::{debug, info, warn};

use crate::client::ClusterClient;
use crate::config::OperatorConfig;
use crate::crd::AtlasMap;
use crate::naming;
use crate::templates;

use super::{object_ref, status_mut, write_status, ActionError};

/// The single host rule of an Ingress this operator manages
fn single_rule_mut(ingress: &mut Ingress) -> Option<&mut IngressRule> {
    match ingress.spec.as_mut()?.rules.as_mut()?.as_mut_slice() {
        [rule] => Some(rule),
        _ => None,
    }
}

pub(super) async fn handle(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    atlasmap: &mut AtlasMap,
) -> Result<(), ActionError> {
    let (namespace, name) = object_ref(atlasmap)?;
    // the derived `<name>-<namespace>` form can outgrow a single label
    let host = naming::ingress_host(atlasmap);
    validate_hostname(&host)?;

    let Some(mut ingress) = client.get_ingress(&namespace, &name).await? else {
        let ingress = templates::ingress(atlasmap, config, &host)?;
        client.create_ingress(&ingress).await?;
        info!(name = %name, namespace = %namespace, host = %host, "Created Ingress");
        return Ok(());
    };

    let Some(rule) = single_rule_mut(&mut ingress) else {
        warn!("Ingress does not have exactly one rule, leaving it alone");
        return Ok(());
    };

    if rule.host.as_deref() != Some(host.as_str()) {
        info!(from = ?rule.host, to = %host, "Updating Ingress host");
        rule.host = Some(host.clone());
        client.update_ingress(&ingress).await?;
    } else {
        debug!("Ingress host unchanged");
    }

    let url = format!("http://{host}");
    if atlasmap.status.as_ref().map(|s| s.url.as_str()) != Some(url.as_str()) {
        info!(url = %url, "Updating AtlasMap URL");
        status_mut(atlasmap).url = url;
        write_status(client, atlasmap).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::crd::{AtlasMapSpec, AtlasMapStatus};
    use crate::templates::test_fixtures::{atlasmap, config};

    fn existing_ingress(host: &str) -> Ingress {
        templates::ingress(&atlasmap(AtlasMapSpec::default()), &config(), host).unwrap()
    }

    fn rule_host(ingress: &Ingress) -> Option<&str> {
        ingress.spec.as_ref()?.rules.as_ref()?.first()?.host.as_deref()
    }

    #[tokio::test]
    async fn test_creates_ingress_with_derived_host() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_ingress().times(1).returning(|_, _| Ok(None));
        mock.expect_create_ingress()
            .withf(|i| rule_host(i) == Some("demo-ns1"))
            .times(1)
            .returning(|i| Ok(i.clone()));

        let mut am = atlasmap(AtlasMapSpec::default());
        handle(&mock, &config(), &mut am).await.unwrap();
    }

    #[tokio::test]
    async fn test_existing_ingress_sets_http_url() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_ingress()
            .returning(|_, _| Ok(Some(existing_ingress("demo-ns1"))));
        mock.expect_update_ingress().never();
        mock.expect_update_atlasmap_status()
            .times(1)
            .returning(|am| Ok(am.clone()));

        let mut am = atlasmap(AtlasMapSpec::default());
        handle(&mock, &config(), &mut am).await.unwrap();
        assert_eq!(am.status.unwrap().url, "http://demo-ns1");
    }

    #[tokio::test]
    async fn test_host_change_updates_rule() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_ingress()
            .returning(|_, _| Ok(Some(existing_ingress("demo-ns1"))));
        mock.expect_update_ingress()
            .withf(|i| rule_host(i) == Some("mapper.example.com"))
            .times(1)
            .returning(|i| Ok(i.clone()));
        mock.expect_update_atlasmap_status()
            .times(1)
            .returning(|am| Ok(am.clone()));

        let mut am = atlasmap(AtlasMapSpec {
            route_host_name: "mapper.example.com".to_string(),
            ..Default::default()
        });
        handle(&mock, &config(), &mut am).await.unwrap();
        assert_eq!(am.status.unwrap().url, "http://mapper.example.com");
    }

    #[tokio::test]
    async fn test_converged_ingress_writes_nothing() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_ingress()
            .returning(|_, _| Ok(Some(existing_ingress("demo-ns1"))));
        mock.expect_update_ingress().never();
        mock.expect_update_atlasmap_status().never();

        let mut am = atlasmap(AtlasMapSpec::default());
        am.status = Some(AtlasMapStatus {
            url: "http://demo-ns1".to_string(),
            ..Default::default()
        });
        handle(&mock, &config(), &mut am).await.unwrap();
    }

    #[tokio::test]
    async fn test_overlong_derived_host_is_rejected() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_ingress().never();
        mock.expect_create_ingress().never();

        let mut am = atlasmap(AtlasMapSpec::default());
        am.metadata.name = Some("a".repeat(63));
        am.metadata.namespace = Some("b".repeat(63));
        let err = handle(&mock, &config(), &mut am).await.unwrap_err();
        assert!(matches!(err, ActionError::InvalidHostname(_)));
    }

    #[tokio::test]
    async fn test_hand_edited_rules_are_left_alone() {
        let mut mock = MockClusterClient::new();
        mock.expect_get_ingress().returning(|_, _| {
            let mut ingress = existing_ingress("demo-ns1");
            if let Some(rules) = ingress.spec.as_mut().and_then(|s| s.rules.as_mut()) {
                rules.push(IngressRule::default());
            }
            Ok(Some(ingress))
        });
        mock.expect_update_ingress().never();
        mock.expect_update_atlasmap_status().never();

        let mut am = atlasmap(AtlasMapSpec::default());
        handle(&mock, &config(), &mut am).await.unwrap();
    }
}
