//! Request path through the degradation orchestrator

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::degradation::AssistantRequest;
    use crate::fallback::ReferencedEntity;
    use crate::stores::CacheStore;
    use crate::tests::support::harness;

    #[tokio::test]
    async fn test_healthy_tool_answers_directly() {
        let h = harness();
        let query = "tariff for 850440 from Germany to Japan";

        let response = h.layer.process(AssistantRequest::new(query)).await;

        assert!(response.success);
        assert!(!response.degraded);
        assert_eq!(response.tools_used, vec!["tariff_lookup".to_string()]);
        assert!(response.unavailable_tools.is_empty());
        assert!(response.strategy.is_none());

        let calls = h.registry.calls_to("tariff_lookup");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].argument("hsCode"), Some("850440"));
        assert_eq!(calls[0].argument("originCountry"), Some("DE"));

        // answer cached, connection back in the pool, budget released
        assert!(h.cache.get(query).await.unwrap().is_some());
        let stats = h.layer.resources.stats();
        assert_eq!(stats.pools["tariff_api"].in_use, 0);
        assert_eq!(stats.active_allocations, 0);

        let health = h.layer.health.health("tariff_lookup");
        assert_eq!(health.success_count, 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_call_tries_next_priority_tool() {
        let h = harness();
        h.registry.fail_times("tariff_lookup", 1);

        let response = h
            .layer
            .process(AssistantRequest::new("import duty on cotton shirts").with_tool("tariff_lookup"))
            .await;

        assert!(response.degraded);
        assert_eq!(response.tools_used, vec!["hs_code_finder".to_string()]);
        assert!(response.unavailable_tools.contains(&"tariff_lookup".to_string()));
        assert!(response.message.starts_with("**Note:**"));
        assert!(response.degradation_reason.unwrap().contains("tariff_lookup"));

        assert_eq!(h.layer.health.health("tariff_lookup").failure_count, 1);
        assert_eq!(h.layer.health.health("hs_code_finder").success_count, 1);
    }

    #[tokio::test]
    async fn test_open_breaker_is_not_a_health_failure() {
        let h = harness();
        h.layer.breaker.force_open("hs_code_finder", "maintenance");

        let response = h
            .layer
            .process(AssistantRequest::new("hs code for leather shoes").with_tool("hs_code_finder"))
            .await;

        assert!(response.degraded);
        assert!(response.unavailable_tools.contains(&"hs_code_finder".to_string()));
        assert_eq!(response.tools_used, vec!["tariff_lookup".to_string()]);
        assert!(h.registry.calls_to("hs_code_finder").is_empty());
        assert_eq!(h.layer.health.health("hs_code_finder").failure_count, 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_failing_alternative_falls_through_to_chain() {
        let h = harness();
        h.layer.health.set_enabled("tariff_lookup", false);
        h.registry.fail_always("hs_code_finder");

        let response = h
            .layer
            .process(AssistantRequest::new("tariff on steel").with_tool("tariff_lookup"))
            .await;

        assert!(response.degraded);
        assert!(response.message.starts_with("I'm experiencing some technical issues"));
        assert!(response.message.contains("**Currently unavailable services:**"));
        assert!(response.message.contains("Tariff Rate Lookup (tariff_lookup)"));
        assert_eq!(response.strategy.as_deref(), Some("PATTERN_TARIFF"));
        assert_eq!(h.layer.health.health("hs_code_finder").failure_count, 1);
    }

    #[tokio::test]
    async fn test_help_query_skips_alternatives() {
        let h = harness();
        h.layer.health.set_enabled("agreement_tool", false);

        let response = h
            .layer
            .process(AssistantRequest::new("hi, what can you do?").with_tool("agreement_tool"))
            .await;

        assert!(response.degraded);
        assert_eq!(response.strategy.as_deref(), Some("BASIC"));
        for tool in ["tariff_lookup", "hs_code_finder"] {
            assert!(h.registry.calls_to(tool).is_empty(), "{}", tool);
        }
    }

    #[tokio::test]
    async fn test_general_query_answered_from_chain() {
        let h = harness();

        let response = h.layer.process(AssistantRequest::new("good morning")).await;

        assert!(!response.degraded);
        assert!(response.success);
        assert!(response.strategy.is_some());
        assert!(response.unavailable_tools.is_empty());
        for tool in crate::tests::support::TRADE_TOOLS {
            assert!(h.registry.calls_to(tool).is_empty(), "{}", tool);
        }
    }

    #[tokio::test]
    async fn test_referenced_entity_used_when_degraded() {
        let h = harness();
        for tool in crate::tests::support::TRADE_TOOLS {
            h.layer.health.set_enabled(tool, false);
        }

        let response = h
            .layer
            .process(
                AssistantRequest::new("what about that one?")
                    .with_tool("hs_code_finder")
                    .with_entity(ReferencedEntity::new("hs_code", "8471.30")),
            )
            .await;

        assert!(response.degraded);
        assert_eq!(response.strategy.as_deref(), Some("CONTEXTUAL"));
        assert!(response.message.contains("8471.30"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_returns_its_connection() {
        let h = harness();
        h.registry.hang("tariff_lookup");
        let max = h.layer.resources.stats().pools["tariff_api"].max_size;

        // one more abandoned request than the pool can hold
        for _ in 0..=max {
            let request = AssistantRequest::new("tariff on steel").with_tool("tariff_lookup");
            let outcome = tokio::time::timeout(Duration::from_millis(5), h.layer.process(request)).await;
            assert!(outcome.is_err());
        }

        assert_eq!(h.registry.calls_to("tariff_lookup").len(), max + 1);
        let stats = h.layer.resources.stats();
        assert_eq!(stats.pools["tariff_api"].in_use, 0);
        assert_eq!(stats.active_allocations, 0);
        assert_eq!(h.layer.breaker.status("tariff_lookup").failure_count, 0);
    }

    #[tokio::test]
    async fn test_unregistered_tool_reported_unavailable() {
        let h = harness();
        h.registry.unregister("market_intelligence");

        let unavailable = h.layer.orchestrator.unavailable_tools();
        assert_eq!(unavailable, vec!["market_intelligence".to_string()]);

        let ranked = h.layer.orchestrator.available_by_priority(&unavailable);
        assert_eq!(ranked.first().map(String::as_str), Some("tariff_lookup"));
        assert!(!ranked.contains(&"market_intelligence".to_string()));
    }
}
