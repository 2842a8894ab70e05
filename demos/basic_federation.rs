//! Basic federation example
//!
//! This example demonstrates:
//! - Registering search chains and configuring sources and providers
//! - Federating a query with a slow mandatory target and an optional one
//! - Reading merged hits, per-target errors and metrics
//! - Filling summaries for the merged hits

use async_trait::async_trait;
use federated_search::{
    Chain, ChainId, ChainRegistry, FederationConfig, FederationOptions, FederationSearcher, Hit, ProviderConfig,
    Query, SearchResult, SourceConfig,
};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

/// A chain standing in for a search backend with a fixed latency
struct DemoChain {
    id: ChainId,
    latency: Duration,
    titles: Vec<&'static str>,
}

impl DemoChain {
    fn new(id: &str, latency_ms: u64, titles: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            id: ChainId::new(id),
            latency: Duration::from_millis(latency_ms),
            titles: titles.to_vec(),
        })
    }
}

#[async_trait]
impl Chain for DemoChain {
    fn id(&self) -> &ChainId {
        &self.id
    }

    async fn execute(&self, query: Query) -> federated_search::Result<SearchResult> {
        tokio::time::sleep(self.latency).await;
        let mut result = SearchResult::new(query);
        for (n, title) in self.titles.iter().enumerate() {
            result.add_hit(Hit::new(format!("{}:{}", self.id, n), 1.0 - n as f64 * 0.1).with_field("title", *title));
        }
        result.set_total_hit_count(self.titles.len() as u64);
        Ok(result)
    }

    async fn fill(&self, result: &mut SearchResult, summary_class: &str) -> federated_search::Result<()> {
        result.hits_mut().for_each_hit_mut(&mut |hit| {
            hit.set_field("snippet", format!("Summary of {}", hit.id));
            hit.set_filled(summary_class);
        });
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("Federated Search Basic Example");
    println!("==============================");

    let mut registry = ChainRegistry::new();
    registry.register(DemoChain::new("news", 30, &["Election results", "Market update"]))?;
    registry.register(DemoChain::new("web", 10, &["Wikipedia: Elections", "Voting guide"]))?;
    registry.register(DemoChain::new("archive", 800, &["Elections of 1905"]))?;
    registry.register(DemoChain::new("ads", 400, &["Buy a ballot box"]))?;

    let config = FederationConfig::new()
        .provider(ProviderConfig::new("news-backend", "news"))
        .provider(ProviderConfig::new("web-backend", "web"))
        .provider(ProviderConfig::new("archive", "archive").options(FederationOptions::new().timeout_ms(200)))
        .provider(ProviderConfig::new("ads", "ads").options(FederationOptions::new().timeout_ms(100).optional(true)))
        .source(SourceConfig::new("news", &["news-backend"]))
        .source(SourceConfig::new("web", &["web-backend"]))
        .build()?;

    let searcher = FederationSearcher::from_config(config, &registry)?;

    let query = Query::builder()
        .text("elections")
        .hits(5)
        .summary("default")
        .property("source.web.hits", "2")
        .trace_level(2)
        .build();

    let result = searcher.federate(query).await;

    println!("\nTotal hits reported: {}", result.total_hit_count());
    for group in result.hits().groups() {
        println!("\n[{}]", group.id());
        for hit in group.hits() {
            let title = hit.field("title").and_then(|v| v.as_str()).unwrap_or("?");
            let snippet = hit.field("snippet").and_then(|v| v.as_str()).unwrap_or("-");
            println!("  {:.2}  {}  ({})", hit.relevance, title, snippet);
        }
        for error in group.errors() {
            println!("  error: {}", error);
        }
    }

    println!("\nTrace:\n{}", result.query().trace().render());

    let snapshot = searcher.metrics().snapshot();
    println!("Metrics: {}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
