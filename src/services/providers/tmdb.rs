/// TMDb catalog matcher and recommendation source
///
/// API Flow:
/// 1. Match: /3/search/{movie|tv}?query= → first hit gives the TMDb id and rating signals
/// 2. Shows only: /3/tv/{id}/external_ids → TVDB id used by Sonarr
/// 3. Recommendations: /3/{movie|tv}/{id}/recommendations → titles fed back into ingest
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    cached,
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
    models::{CatalogMatch, ExternalId, MediaKind},
    services::providers::{CatalogMatcher, RecommendationSource},
};

const MATCH_CACHE_TTL: u64 = 86_400; // 1 day

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: u64,
    /// Movies carry `title`, shows carry `name`
    title: Option<String>,
    name: Option<String>,
    vote_average: Option<f64>,
    vote_count: Option<i64>,
}

impl SearchHit {
    fn display_title(&self) -> Option<String> {
        self.title.clone().or_else(|| self.name.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    tvdb_id: Option<u64>,
}

fn segment(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Movie => "movie",
        MediaKind::Show => "tv",
    }
}

#[derive(Clone)]
pub struct TmdbMatcher {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    cache: Cache,
}

impl TmdbMatcher {
    pub fn new(cache: Cache, api_key: String, api_url: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url: api_url.trim_end_matches('/').to_string(),
            cache,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> AppResult<T> {
        let url = format!("{}/3/{}", self.api_url, path);

        let response = self
            .http_client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::from_response("tmdb", response).await);
        }

        Ok(response.json().await?)
    }

    async fn first_hit(&self, title: &str, kind: MediaKind) -> AppResult<Option<SearchHit>> {
        let search: SearchResponse = self
            .get(&format!("search/{}", segment(kind)), &[("query", title)])
            .await?;
        Ok(search.results.into_iter().next())
    }

    async fn search(&self, title: String, kind: MediaKind) -> AppResult<Option<CatalogMatch>> {
        let Some(hit) = self.first_hit(&title, kind).await? else {
            tracing::debug!(title = %title, kind = %kind, "No TMDb match");
            return Ok(None);
        };

        let secondary_external_id = match kind {
            MediaKind::Movie => None,
            MediaKind::Show => {
                let ids: ExternalIds = self.get(&format!("tv/{}/external_ids", hit.id), &[]).await?;
                ids.tvdb_id.map(|id| id.to_string())
            }
        };

        Ok(Some(CatalogMatch {
            external_id: ExternalId::from(hit.id),
            secondary_external_id,
            title: hit.display_title(),
            rating_average: hit.vote_average,
            rating_count: hit.vote_count,
        }))
    }

    /// Titles TMDb recommends for the best match of `seed`
    pub async fn recommendations(&self, seed: &str, kind: MediaKind) -> AppResult<Vec<String>> {
        let Some(hit) = self.first_hit(seed, kind).await? else {
            return Err(AppError::NotFound(format!("No {} matches seed '{}'", kind, seed)));
        };

        let recommended: SearchResponse = self
            .get(&format!("{}/{}/recommendations", segment(kind), hit.id), &[])
            .await?;

        Ok(recommended
            .results
            .iter()
            .filter_map(SearchHit::display_title)
            .collect())
    }
}

#[async_trait]
impl CatalogMatcher for TmdbMatcher {
    async fn resolve(&self, title: &str, kind: MediaKind) -> AppResult<Option<CatalogMatch>> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Ok(None);
        }

        let key = CacheKey::CatalogMatch(kind, title.clone());
        cached!(self.cache, key, MATCH_CACHE_TTL, async move {
            self.search(title, kind).await
        })
    }
}

/// TMDb "more like this" for one media kind
#[derive(Clone)]
pub struct TmdbRecommendations {
    matcher: TmdbMatcher,
    kind: MediaKind,
}

impl TmdbRecommendations {
    pub fn new(matcher: TmdbMatcher, kind: MediaKind) -> Self {
        Self { matcher, kind }
    }
}

#[async_trait]
impl RecommendationSource for TmdbRecommendations {
    async fn generate(&self, seed: &str) -> AppResult<Vec<String>> {
        let titles = self.matcher.recommendations(seed, self.kind).await?;
        tracing::info!(seed = %seed, kind = %self.kind, count = titles.len(), "Fetched TMDb recommendations");
        Ok(titles)
    }
}
