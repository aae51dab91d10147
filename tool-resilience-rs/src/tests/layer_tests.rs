//! Wiring, lifecycle and configuration of the assembled layer

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::ResilienceConfig;
    use crate::degradation::AssistantRequest;
    use crate::registry::{ToolCall, ToolRegistry};
    use crate::resources::FixedMetrics;
    use crate::tests::support::{harness, ScriptedRegistry};
    use crate::ResilienceLayer;

    #[tokio::test]
    async fn test_builder_applies_config() {
        let cfg = config::Config::builder()
            .set_override("breaker.failure_threshold", 2)
            .unwrap()
            .set_override("breaker.max_retries", 0)
            .unwrap()
            .set_override("breaker.retry_delay_ms", 0)
            .unwrap()
            .set_override("resources.pools.tariff_api.max_size", 6)
            .unwrap()
            .build()
            .unwrap();
        let config = ResilienceConfig::from_config(&cfg).unwrap();

        let registry = Arc::new(ScriptedRegistry::trade_tools());
        registry.fail_always("agreement_tool");
        let layer = ResilienceLayer::builder(registry.clone())
            .config(config)
            .metrics_source(Arc::new(FixedMetrics::default()))
            .build();

        assert_eq!(layer.breaker.config().failure_threshold, 2);
        assert_eq!(layer.resources.stats().pools["tariff_api"].max_size, 6);

        for _ in 0..2 {
            let _ = layer
                .breaker
                .execute("agreement_tool", || registry.invoke(ToolCall::new("agreement_tool")))
                .await;
        }
        assert!(!layer.breaker.is_healthy("agreement_tool"));
    }

    #[tokio::test]
    async fn test_history_answers_for_returning_user() {
        let h = harness();
        let transcript = format!(
            "{}\nTariff on ceramic tiles from Spain is 8.5% under the current schedule.",
            "Earlier we went through the duty schedule for ceramic tiles and the applicable exemptions. ".repeat(2)
        );
        h.conversations.record("user-7", "conv-1", &transcript).await;
        h.layer.health.set_enabled("tariff_lookup", false);
        for tool in ["hs_code_finder", "agreement_tool", "compliance_analysis", "market_intelligence", "risk_assessment"] {
            h.layer.breaker.force_open(tool, "maintenance");
        }

        let response = h
            .layer
            .process(AssistantRequest::new("what is the tariff on tiles").with_user("user-7"))
            .await;

        assert!(response.degraded);
        assert_eq!(response.strategy.as_deref(), Some("HISTORY"));
        assert!(response.message.contains("Based on your recent conversations"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown() {
        let h = harness();
        h.layer.start();
        // a second start keeps the existing background jobs
        h.layer.start();

        tokio::time::sleep(Duration::from_secs(2 * 60 + 1)).await;
        assert!(h.layer.resources.latest_load().is_some());

        h.layer.shutdown().await;
    }

    #[tokio::test]
    async fn test_layer_debug_lists_components() {
        let h = harness();
        let debug = format!("{:?}", h.layer);
        assert!(debug.contains("FallbackSelector"));
        assert!(debug.contains("DegradationOrchestrator"));
    }
}
