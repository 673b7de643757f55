//! Chroma HTTP backend

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::backend::IndexBackend;
use crate::config::StoreConfig;
use crate::error::{VectorError, VectorResult};
use crate::types::{
    CollectionHandle, DeleteSelector, Embedding, FetchedRecords, GetSelector, Include, Metadata,
    QueryMatch, Record,
};

const API_PREFIX: &str = "/api/v1";

/// Vector index reached over the Chroma REST API
#[derive(Debug, Clone)]
pub struct ChromaBackend {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateCollectionBody<'a> {
    name: &'a str,
    metadata: &'a Metadata,
    get_or_create: bool,
}

#[derive(Debug, Deserialize)]
struct CollectionBody {
    id: String,
    name: String,
    #[serde(default)]
    metadata: Option<Metadata>,
}

impl From<CollectionBody> for CollectionHandle {
    fn from(body: CollectionBody) -> Self {
        Self {
            id: body.id,
            name: body.name,
            metadata: body.metadata.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct UpsertBody<'a> {
    ids: Vec<&'a str>,
    embeddings: Vec<&'a [f32]>,
    metadatas: Vec<Option<&'a Metadata>>,
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    include: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponseBody {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<Embedding>>>,
}

#[derive(Debug, Serialize)]
struct GetBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<usize>,
    include: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct GetResponseBody {
    ids: Vec<String>,
    #[serde(default)]
    embeddings: Option<Vec<Embedding>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<Metadata>>>,
}

fn non_empty(metadata: &Metadata) -> Option<&Metadata> {
    (!metadata.is_empty()).then_some(metadata)
}

fn transport_error(err: &reqwest::Error) -> VectorError {
    if err.is_timeout() {
        VectorError::unavailable(format!("request timed out: {err}"))
    } else {
        VectorError::unavailable(err.to_string())
    }
}

impl ChromaBackend {
    /// Create a backend from the store configuration
    pub fn new(config: &StoreConfig) -> VectorResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| VectorError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.url.clone(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url.trim_end_matches('/'), API_PREFIX, path)
    }

    /// Send a request and translate failures into the error taxonomy.
    ///
    /// `records` is the number of records carried by the body, reported
    /// back in `PayloadTooLarge`.
    async fn execute(&self, request: RequestBuilder, records: usize) -> VectorResult<Response> {
        let request = match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(|e| transport_error(&e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unable to read body>".to_string());

        match status {
            StatusCode::PAYLOAD_TOO_LARGE => Err(VectorError::PayloadTooLarge { records }),
            StatusCode::NOT_FOUND => Err(VectorError::NotFound(body)),
            _ => Err(VectorError::Remote {
                status: status.as_u16(),
                body,
            }),
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> VectorResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| VectorError::Decode(e.to_string()))
    }

    fn collection_path(collection: &CollectionHandle, action: &str) -> String {
        format!("/collections/{}/{action}", collection.id)
    }
}

#[async_trait]
impl IndexBackend for ChromaBackend {
    async fn get_or_create_collection(
        &self,
        name: &str,
        metadata: Metadata,
    ) -> VectorResult<CollectionHandle> {
        let body = CreateCollectionBody {
            name,
            metadata: &metadata,
            get_or_create: true,
        };
        let request = self.http.post(self.endpoint("/collections")).json(&body);
        let response = self.execute(request, 0).await?;
        let collection: CollectionBody = Self::decode(response).await?;

        debug!(collection = %collection.name, id = %collection.id, "Chroma collection resolved");
        Ok(collection.into())
    }

    async fn upsert(&self, collection: &CollectionHandle, records: &[Record]) -> VectorResult<()> {
        let body = UpsertBody {
            ids: records.iter().map(|r| r.id.as_str()).collect(),
            embeddings: records.iter().map(|r| r.embedding.as_slice()).collect(),
            metadatas: records.iter().map(|r| non_empty(&r.metadata)).collect(),
        };
        let request = self
            .http
            .post(self.endpoint(&Self::collection_path(collection, "upsert")))
            .json(&body);
        self.execute(request, records.len()).await?;

        debug!(collection = %collection.name, records = records.len(), "Chroma upsert");
        Ok(())
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        embedding: &Embedding,
        n_results: usize,
        include: Include,
    ) -> VectorResult<Vec<QueryMatch>> {
        let include = Include {
            distances: true,
            ..include
        };
        let body = QueryBody {
            query_embeddings: [embedding.as_slice()],
            n_results,
            include: include.to_fields(),
        };
        let request = self
            .http
            .post(self.endpoint(&Self::collection_path(collection, "query")))
            .json(&body);
        let response = self.execute(request, 0).await?;
        let body: QueryResponseBody = Self::decode(response).await?;

        let ids = body.ids.into_iter().next().unwrap_or_default();
        let distances = body
            .distances
            .and_then(|rows| rows.into_iter().next())
            .ok_or_else(|| VectorError::Decode("query response without distances".to_string()))?;
        if distances.len() != ids.len() {
            return Err(VectorError::Decode(format!(
                "query returned {} ids but {} distances",
                ids.len(),
                distances.len()
            )));
        }

        let mut metadatas = body
            .metadatas
            .and_then(|rows| rows.into_iter().next())
            .map(Vec::into_iter);
        let mut embeddings = body
            .embeddings
            .and_then(|rows| rows.into_iter().next())
            .map(Vec::into_iter);

        Ok(ids
            .into_iter()
            .zip(distances)
            .map(|(id, distance)| {
                let metadata = metadatas
                    .as_mut()
                    .and_then(|rows| rows.next())
                    .map(Option::unwrap_or_default);
                let embedding = embeddings.as_mut().and_then(|rows| rows.next());
                QueryMatch::from_distance(id, distance, metadata, embedding)
            })
            .collect())
    }

    async fn get(
        &self,
        collection: &CollectionHandle,
        selector: GetSelector,
        include: Include,
    ) -> VectorResult<FetchedRecords> {
        let body = match &selector {
            GetSelector::Ids(ids) => GetBody {
                ids: Some(ids.as_slice()),
                limit: None,
                offset: None,
                include: include.to_fields(),
            },
            GetSelector::Page { offset, limit } => GetBody {
                ids: None,
                limit: Some(*limit),
                offset: Some(*offset),
                include: include.to_fields(),
            },
        };
        let request = self
            .http
            .post(self.endpoint(&Self::collection_path(collection, "get")))
            .json(&body);
        let response = self.execute(request, 0).await?;
        let body: GetResponseBody = Self::decode(response).await?;

        let mut embeddings = body.embeddings.map(Vec::into_iter);
        let mut metadatas = body.metadatas.map(Vec::into_iter);

        let records = body
            .ids
            .into_iter()
            .map(|id| Record {
                id,
                embedding: embeddings
                    .as_mut()
                    .and_then(|rows| rows.next())
                    .unwrap_or_default(),
                metadata: metadatas
                    .as_mut()
                    .and_then(|rows| rows.next())
                    .flatten()
                    .unwrap_or_default(),
            })
            .collect();

        Ok(FetchedRecords { records })
    }

    async fn count(&self, collection: &CollectionHandle) -> VectorResult<usize> {
        let request = self
            .http
            .get(self.endpoint(&Self::collection_path(collection, "count")));
        let response = self.execute(request, 0).await?;
        Self::decode(response).await
    }

    async fn delete(
        &self,
        collection: &CollectionHandle,
        selector: DeleteSelector,
    ) -> VectorResult<()> {
        let body = match selector {
            DeleteSelector::Ids(ids) => json!({ "ids": ids }),
            DeleteSelector::All => json!({ "where": {} }),
        };
        let request = self
            .http
            .post(self.endpoint(&Self::collection_path(collection, "delete")))
            .json(&body);
        self.execute(request, 0).await?;
        Ok(())
    }

    async fn list_collections(&self) -> VectorResult<Vec<CollectionHandle>> {
        let request = self.http.get(self.endpoint("/collections"));
        let response = self.execute(request, 0).await?;
        let collections: Vec<CollectionBody> = Self::decode(response).await?;
        Ok(collections.into_iter().map(Into::into).collect())
    }

    async fn delete_collection(&self, name: &str) -> VectorResult<()> {
        let request = self
            .http
            .delete(self.endpoint(&format!("/collections/{name}")));
        match self.execute(request, 0).await {
            Err(VectorError::NotFound(_)) => Err(VectorError::not_found(format!("collection {name}"))),
            // Older servers answer a missing collection with a 500 and a ValueError body.
            Err(VectorError::Remote { body, .. }) if body.contains("does not exist") => {
                Err(VectorError::not_found(format!("collection {name}")))
            }
            other => other.map(|_| ()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "chroma"
    }
}
