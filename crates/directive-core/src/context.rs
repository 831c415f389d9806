//! Context aggregation: per-request environmental and socioeconomic snapshots.
//!
//! Domain readers are external collaborators. `SourceAggregator` fans out to every registered
//! `DomainSource` concurrently, bounds each call with a timeout and drops domains that fail or
//! time out (logged at warn). The resulting `EvaluationContext` is owned by one request.

use crate::error::ContextError;
use crate::shared::{DomainMap, EvaluationContext, Readings, Section};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default per-domain read timeout.
pub const DEFAULT_DOMAIN_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Supplies the evaluation context for a location.
#[async_trait]
pub trait ContextAggregator: Send + Sync {
    async fn get_environmental(&self, location: Option<&str>) -> Result<DomainMap, ContextError>;

    async fn get_socioeconomic(&self, location: Option<&str>) -> Result<DomainMap, ContextError>;

    /// Both halves, fetched concurrently. An `Err` here means the aggregator itself is
    /// unreachable; individual missing domains are simply absent from the maps.
    async fn snapshot(&self, location: Option<&str>) -> Result<EvaluationContext, ContextError> {
        let (environmental, socioeconomic) = tokio::join!(
            self.get_environmental(location),
            self.get_socioeconomic(location)
        );
        Ok(EvaluationContext {
            environmental: environmental?,
            socioeconomic: socioeconomic?,
        })
    }
}

/// One domain reader (e.g. radiation, crime).
#[async_trait]
pub trait DomainSource: Send + Sync {
    /// Domain name under which readings are stored (e.g. `radiation`).
    fn domain(&self) -> &str;

    fn section(&self) -> Section;

    async fn read(&self, location: Option<&str>) -> Result<Readings, ContextError>;
}

/// Fans out to registered domain sources with a bounded timeout per source.
pub struct SourceAggregator {
    sources: Vec<Arc<dyn DomainSource>>,
    timeout: Duration,
}

impl Default for SourceAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceAggregator {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            timeout: DEFAULT_DOMAIN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn DomainSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn register(&mut self, source: Arc<dyn DomainSource>) {
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    async fn collect(&self, section: Section, location: Option<&str>) -> DomainMap {
        let mut set = JoinSet::new();
        let timeout = self.timeout;

        for source in self.sources.iter().filter(|s| s.section() == section) {
            let source = Arc::clone(source);
            let location = location.map(str::to_string);
            set.spawn(async move {
                let domain = source.domain().to_string();
                let result = match tokio::time::timeout(timeout, source.read(location.as_deref())).await {
                    Ok(result) => result,
                    Err(_) => Err(ContextError::Timeout {
                        domain: domain.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                };
                (domain, result)
            });
        }

        let mut domains = DomainMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((domain, Ok(readings))) => {
                    domains.insert(domain, readings);
                }
                Ok((domain, Err(e))) => {
                    warn!(
                        section = section.as_str(),
                        domain = %domain,
                        error = %e,
                        "Domain data unavailable; treating as absent"
                    );
                }
                Err(e) => {
                    warn!(section = section.as_str(), error = %e, "Domain reader task aborted");
                }
            }
        }
        debug!(
            section = section.as_str(),
            domains = domains.len(),
            "Context section collected"
        );
        domains
    }
}

#[async_trait]
impl ContextAggregator for SourceAggregator {
    async fn get_environmental(&self, location: Option<&str>) -> Result<DomainMap, ContextError> {
        Ok(self.collect(Section::Environmental, location).await)
    }

    async fn get_socioeconomic(&self, location: Option<&str>) -> Result<DomainMap, ContextError> {
        Ok(self.collect(Section::Socioeconomic, location).await)
    }
}

/// Fixed readings for one domain. Location is ignored.
#[derive(Debug, Clone)]
pub struct StaticSource {
    domain: String,
    section: Section,
    readings: Readings,
}

impl StaticSource {
    pub fn new(section: Section, domain: impl Into<String>, readings: Readings) -> Self {
        Self {
            domain: domain.into(),
            section,
            readings,
        }
    }
}

#[async_trait]
impl DomainSource for StaticSource {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn section(&self) -> Section {
        self.section
    }

    async fn read(&self, _location: Option<&str>) -> Result<Readings, ContextError> {
        Ok(self.readings.clone())
    }
}

/// Returns the same context for every location. Used by the daemon and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticAggregator {
    context: EvaluationContext,
}

impl StaticAggregator {
    pub fn new(context: EvaluationContext) -> Self {
        Self { context }
    }

    /// Loads a JSON `{"environmental": {..}, "socioeconomic": {..}}` snapshot.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ContextError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ContextError::Unreachable(format!("{}: {}", path.display(), e)))?;
        let context: EvaluationContext = serde_json::from_str(&raw)
            .map_err(|e| ContextError::Unreachable(format!("{}: {}", path.display(), e)))?;
        Ok(Self { context })
    }

    pub fn context(&self) -> &EvaluationContext {
        &self.context
    }
}

#[async_trait]
impl ContextAggregator for StaticAggregator {
    async fn get_environmental(&self, _location: Option<&str>) -> Result<DomainMap, ContextError> {
        Ok(self.context.environmental.clone())
    }

    async fn get_socioeconomic(&self, _location: Option<&str>) -> Result<DomainMap, ContextError> {
        Ok(self.context.socioeconomic.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Reading;

    struct SlowSource {
        delay: Duration,
    }

    #[async_trait]
    impl DomainSource for SlowSource {
        fn domain(&self) -> &str {
            "seismic"
        }

        fn section(&self) -> Section {
            Section::Environmental
        }

        async fn read(&self, _location: Option<&str>) -> Result<Readings, ContextError> {
            tokio::time::sleep(self.delay).await;
            Ok(readings(&[("seismic_activity", 9.0)]))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl DomainSource for FailingSource {
        fn domain(&self) -> &str {
            "crime"
        }

        fn section(&self) -> Section {
            Section::Socioeconomic
        }

        async fn read(&self, _location: Option<&str>) -> Result<Readings, ContextError> {
            Err(ContextError::DataUnavailable {
                domain: "crime".into(),
                reason: "upstream 503".into(),
            })
        }
    }

    fn readings(pairs: &[(&str, f64)]) -> Readings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Reading::Number(*v)))
            .collect()
    }

    #[tokio::test]
    async fn test_sources_land_in_their_section() {
        let agg = SourceAggregator::new()
            .with_source(Arc::new(StaticSource::new(
                Section::Environmental,
                "radiation",
                readings(&[("radiation_level", 42.0)]),
            )))
            .with_source(Arc::new(StaticSource::new(
                Section::Socioeconomic,
                "economic_data",
                readings(&[("gdp_growth", 1.5)]),
            )));

        let ctx = agg.snapshot(Some("Gettysburg, PA")).await.unwrap();
        assert_eq!(
            ctx.number(Section::Environmental, "radiation", "radiation_level"),
            Ok(Some(42.0))
        );
        assert_eq!(
            ctx.number(Section::Socioeconomic, "economic_data", "gdp_growth"),
            Ok(Some(1.5))
        );
        assert!(!ctx.environmental.contains_key("economic_data"));
    }

    #[tokio::test]
    async fn test_failed_and_timed_out_domains_are_absent() {
        let agg = SourceAggregator::new()
            .with_timeout(Duration::from_millis(20))
            .with_source(Arc::new(SlowSource {
                delay: Duration::from_millis(500),
            }))
            .with_source(Arc::new(FailingSource))
            .with_source(Arc::new(StaticSource::new(
                Section::Environmental,
                "air_quality",
                readings(&[("aqi", 40.0)]),
            )));

        let ctx = agg.snapshot(None).await.unwrap();
        assert!(!ctx.environmental.contains_key("seismic"));
        assert!(ctx.environmental.contains_key("air_quality"));
        assert!(ctx.socioeconomic.is_empty());
    }

    #[tokio::test]
    async fn test_slow_source_within_timeout_is_kept() {
        let agg = SourceAggregator::new()
            .with_timeout(Duration::from_secs(2))
            .with_source(Arc::new(SlowSource {
                delay: Duration::from_millis(10),
            }));
        let ctx = agg.snapshot(None).await.unwrap();
        assert_eq!(
            ctx.number(Section::Environmental, "seismic", "seismic_activity"),
            Ok(Some(9.0))
        );
    }

    #[tokio::test]
    async fn test_static_aggregator_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("context.json");
        std::fs::write(
            &path,
            r#"{"environmental":{"radiation":{"radiation_level":120}},"socioeconomic":{"property_values":{"market_trend":"stable"}}}"#,
        )
        .unwrap();

        let agg = StaticAggregator::from_path(&path).unwrap();
        let ctx = agg.snapshot(Some("anywhere")).await.unwrap();
        assert_eq!(ctx, *agg.context());
        assert_eq!(
            ctx.text(Section::Socioeconomic, "property_values", "market_trend"),
            Ok(Some("stable"))
        );

        assert!(matches!(
            StaticAggregator::from_path(dir.path().join("missing.json")),
            Err(ContextError::Unreachable(_))
        ));
    }
}
