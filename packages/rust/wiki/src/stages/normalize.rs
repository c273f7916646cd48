use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, warn};

use etlflow_core::{BatchProcessor, Emitter, Result, StepOptions};

use crate::client::{Resolution, WikiClient};
use crate::record::CityRecord;

/// Normalizes city names to the titles of their Wikipedia pages.
///
/// One `action=query` request per batch, so the batch size follows the
/// MediaWiki multi-title limit. Names without a page are logged and skipped.
pub struct NormalizeCityNames {
    client: Arc<WikiClient>,
    batch_size: usize,
}

impl NormalizeCityNames {
    pub fn new(client: Arc<WikiClient>, batch_size: usize) -> Self {
        Self { client, batch_size }
    }
}

#[async_trait]
impl BatchProcessor<CityRecord> for NormalizeCityNames {
    #[instrument(skip_all, fields(size = batch.len()))]
    async fn process_batch(
        &self,
        batch: Vec<CityRecord>,
        out: &mut Emitter<CityRecord>,
    ) -> Result<()> {
        let names = super::names("normalize", batch)?;
        let query = self.client.query_titles(&names).await?;

        for name in &names {
            match query.resolve(name) {
                Resolution::Found(title) => out.emit(CityRecord::Name { title }),
                Resolution::Missing(title) => {
                    warn!(
                        city = %name,
                        %title,
                        "city is not available on Wikipedia, skipping"
                    );
                }
            }
        }
        Ok(())
    }

    fn options(&self, defaults: StepOptions) -> StepOptions {
        defaults.with_max_batch_size(self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use etlflow_core::{Output, ResultsSink};
    use serde_json::json;
    use url::Url;

    use super::*;

    #[tokio::test]
    async fn test_normalize_emits_redirect_targets_and_skips_missing() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::query_param("action", "query"))
            .and(wiremock::matchers::query_param(
                "titles",
                "Cincinnati, Ohio|Dayton, Ohio|Atlantis, Ohio",
            ))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({
                "query": {
                    "redirects": [{"from": "Cincinnati, Ohio", "to": "Cincinnati"}],
                    "pages": {
                        "43904": {"title": "Cincinnati"},
                        "8285": {"title": "Dayton, Ohio"},
                        "-1": {"title": "Atlantis, Ohio", "missing": ""}
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let client = Arc::new(WikiClient::with_api_url(url, Duration::from_secs(5)).unwrap());
        let stage = NormalizeCityNames::new(client, 50);
        assert_eq!(stage.options(StepOptions::default()).max_batch_size, 50);

        let sink = Arc::new(ResultsSink::<CityRecord>::default());
        let outputs: Vec<Arc<dyn Output<CityRecord>>> = vec![sink.clone()];
        let mut emitter = Emitter::new(outputs);
        let batch = vec![
            CityRecord::name("Cincinnati, Ohio"),
            CityRecord::name("Dayton, Ohio"),
            CityRecord::name("Atlantis, Ohio"),
        ];

        stage.process_batch(batch, &mut emitter).await.unwrap();

        assert_eq!(
            sink.snapshot(),
            vec![CityRecord::name("Cincinnati"), CityRecord::name("Dayton, Ohio")]
        );
    }

    #[tokio::test]
    async fn test_normalize_rejects_other_records() {
        let url = Url::parse("http://127.0.0.1:9/w/api.php").unwrap();
        let client = Arc::new(WikiClient::with_api_url(url, Duration::from_secs(1)).unwrap());
        let stage = NormalizeCityNames::new(client, 50);
        let mut emitter = Emitter::new(Vec::new());

        let batch = vec![CityRecord::Page {
            city: "Cincinnati".into(),
            parsetree: "<root/>".into(),
        }];
        let err = stage.process_batch(batch, &mut emitter).await.unwrap_err();
        assert!(err.to_string().contains("normalize received a 'page' record"));
    }
}
