pub mod cleaner;
pub mod discovery;
pub mod http_client;
pub mod locality;
pub mod parsers;
pub mod table;

use crate::models::{Fuel, LocalityPrice, PriceMap, RegionListing};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use self::http_client::{FetchError, HttpClient};
use self::table::ListingPage;

// ── Fetcher trait ─────────────────────────────────────────────────────────────

/// Swappable page source: the live HTTP client, or canned pages in tests.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

// ── Price source ──────────────────────────────────────────────────────────────

/// URL building and page parsing for the price site.
#[derive(Clone)]
pub struct FuelSource {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
}

impl FuelSource {
    pub fn new(fetcher: Arc<dyn PageFetcher>, base_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Petrol index page listing every region.
    pub fn index_url(&self) -> String {
        format!("{}/petrol-price.html", self.base_url)
    }

    /// Region listing for `fuel`, derived from the discovered petrol listing.
    pub fn listing_url(&self, fuel: Fuel, listing: &RegionListing) -> String {
        listing
            .listing_url
            .replace("/petrol-price-in-", &format!("/{}-price-in-", fuel.as_str()))
    }

    /// Detail page for one locality. e.g. (Lpg, "kochi") → /lpg-price-in-kochi.html
    pub fn locality_url(&self, fuel: Fuel, slug: &str) -> String {
        format!("{}/{}-price-in-{}.html", self.base_url, fuel.as_str(), slug)
    }

    /// Absolute URL for a site-relative path.
    pub fn page_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    pub async fn discover_regions(&self) -> Result<Vec<RegionListing>, FetchError> {
        let url = self.index_url();
        info!("Discovering regions from {}", url);
        let html = self.fetcher.fetch(&url).await?;
        let regions = discovery::parse_region_index(&html, &self.base_url);
        info!("Discovered {} region listings", regions.len());
        Ok(regions)
    }

    /// Fetch and parse one region's listing table for `fuel`.
    pub async fn fetch_listing(&self, listing: &RegionListing, fuel: Fuel) -> Result<ListingPage, FetchError> {
        let url = self.listing_url(fuel, listing);
        debug!("Fetching {} listing for {}: {}", fuel, listing.code, url);
        let html = self.fetcher.fetch(&url).await?;
        let page = table::parse_listing(&html, fuel, Some(&listing.display_name));
        if page.prices.is_empty() {
            warn!("{}: no {} rows found on listing page", listing.code, fuel);
        }
        Ok(page)
    }

    /// Fetch one locality's detail page. A page without a usable price is
    /// not an error; it yields an empty [`LocalityPrice`].
    pub async fn fetch_locality_price(
        &self,
        region: &str,
        locality: &str,
        slug: &str,
        fuel: Fuel,
    ) -> Result<LocalityPrice, FetchError> {
        let url = self.locality_url(fuel, slug);
        let html = self.fetcher.fetch(&url).await?;
        let price = locality::parse_locality_page(&html, fuel);
        debug!(
            "{}/{}: {} = {:?} (updated {:?})",
            region, locality, fuel, price.price, price.source_updated_on
        );
        Ok(price)
    }

    /// Two-column "name | price" page outside the regular listing layout.
    pub async fn fetch_simple_table(&self, path: &str, fuel: Fuel) -> Result<PriceMap, FetchError> {
        let url = self.page_url(path);
        debug!("Fetching supplemental {} table: {}", fuel, url);
        let html = self.fetcher.fetch(&url).await?;
        Ok(table::parse_simple_table(&html, fuel))
    }
}

#[cfg(test)]
pub mod testing {
    //! Canned-page fetcher shared by scraper and pipeline tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct StaticFetcher {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl StaticFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }

        pub fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }

        pub fn requested_matching(&self, needle: &str) -> Vec<String> {
            self.requested()
                .into_iter()
                .filter(|u| u.contains(needle))
                .collect()
        }
    }

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
                status: 404,
                url: url.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StaticFetcher;
    use super::*;

    const BASE: &str = "https://fuel.test";

    fn kerala() -> RegionListing {
        RegionListing {
            code: "KL".into(),
            display_name: "Kerala".into(),
            listing_url: format!("{BASE}/petrol-price-in-kerala-s18.html"),
        }
    }

    #[test]
    fn test_urls() {
        let source = FuelSource::new(Arc::new(StaticFetcher::new()), "https://fuel.test/");
        assert_eq!(source.index_url(), "https://fuel.test/petrol-price.html");
        assert_eq!(
            source.listing_url(Fuel::Cng, &kerala()),
            "https://fuel.test/cng-price-in-kerala-s18.html"
        );
        assert_eq!(
            source.locality_url(Fuel::Lpg, "kochi"),
            "https://fuel.test/lpg-price-in-kochi.html"
        );
        assert_eq!(
            source.page_url("/lpg-price-in-kerala-s18.html"),
            "https://fuel.test/lpg-price-in-kerala-s18.html"
        );
    }

    #[tokio::test]
    async fn test_discover_regions() {
        let fetcher = StaticFetcher::new().with_page(
            &format!("{BASE}/petrol-price.html"),
            r#"<a href="/petrol-price-in-kerala-s18.html">Kerala</a>
               <a href="/petrol-price-in-goa-s10.html">Goa</a>"#,
        );
        let source = FuelSource::new(Arc::new(fetcher), BASE);
        let regions = source.discover_regions().await.unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0], kerala());
    }

    #[tokio::test]
    async fn test_locality_fetch_error_surfaces() {
        let fetcher = Arc::new(StaticFetcher::new());
        let source = FuelSource::new(fetcher.clone(), BASE);
        let err = source
            .fetch_locality_price("KL", "Kochi", "kochi", Fuel::Petrol)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert_eq!(
            fetcher.requested(),
            vec!["https://fuel.test/petrol-price-in-kochi.html".to_string()]
        );
    }
}
