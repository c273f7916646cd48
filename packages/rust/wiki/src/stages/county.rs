use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use etlflow_core::{BatchProcessor, Emitter, EtlError, Result, StepOptions};

use crate::client::{Resolution, WikiClient};
use crate::parsetree::{self, COUNTY_NAVBOX_TEMPLATE, Node};
use crate::record::CityRecord;

/// Expands each city into the cities listed in its county navigation box.
///
/// The navboxes of the city page are tried in order; the first one built on
/// the US county navigation box template wins. Its county seat is resolved
/// through redirects and attached to every emitted member.
pub struct ExpandCounty {
    client: Arc<WikiClient>,
}

impl ExpandCounty {
    pub fn new(client: Arc<WikiClient>) -> Self {
        Self { client }
    }

    async fn expand(&self, city: String, page_tree: &str, out: &mut Emitter<CityRecord>) -> Result<()> {
        let page = parsetree::parse(page_tree)?;

        for template in parsetree::navbox_templates(&page) {
            let raw = self.client.parse_tree(&template).await?;
            let template_tree = parsetree::parse(&raw)?;
            let Some(navbox) = template_tree.templates(COUNTY_NAVBOX_TEMPLATE).next() else {
                debug!(%city, %template, "not a county navbox");
                continue;
            };

            let seat = self.resolve_seat(&template, navbox).await?;
            let members = parsetree::listed_links(&raw)?;
            info!(%city, %template, %seat, members = members.len(), "expanding county");

            for member in members {
                out.emit(CityRecord::CountyMember {
                    origin: city.clone(),
                    city: member,
                    seat: seat.clone(),
                });
            }
            return Ok(());
        }

        debug!(%city, "no county navbox found");
        Ok(())
    }

    async fn resolve_seat(&self, template: &str, navbox: &Node) -> Result<String> {
        let seat = navbox
            .part_value("seat")
            .map(|value| parsetree::link_target(&value.text).to_string())
            .filter(|seat| !seat.is_empty())
            .ok_or_else(|| EtlError::validation(format!("{template} has no county seat")))?;

        let query = self.client.query_titles(std::slice::from_ref(&seat)).await?;
        match query.resolve(&seat) {
            Resolution::Found(title) => Ok(title),
            Resolution::Missing(title) => Err(EtlError::validation(format!(
                "county seat '{title}' of {template} is not available on Wikipedia"
            ))),
        }
    }
}

#[async_trait]
impl BatchProcessor<CityRecord> for ExpandCounty {
    #[instrument(skip_all, fields(size = batch.len()))]
    async fn process_batch(
        &self,
        batch: Vec<CityRecord>,
        out: &mut Emitter<CityRecord>,
    ) -> Result<()> {
        for record in batch {
            match record {
                CityRecord::Page { city, parsetree } => self.expand(city, &parsetree, out).await?,
                other => return Err(super::unexpected("county", &other)),
            }
        }
        Ok(())
    }

    fn options(&self, defaults: StepOptions) -> StepOptions {
        defaults.with_concurrent_batches(true)
    }

    /// A city is expanded once, whichever parse tree it arrives with.
    fn dedup_key(&self, record: &CityRecord) -> u64 {
        let mut hasher = DefaultHasher::new();
        match record {
            CityRecord::Page { city, .. } => city.hash(&mut hasher),
            other => other.hash(&mut hasher),
        }
        hasher.finish()
    }
}
