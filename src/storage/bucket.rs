use crate::core::{parse_error_response, ApiClient};
use crate::storage::file::File;
use crate::storage::StorageError;
use serde::Deserialize;

/// A reference to a Storage bucket.
#[derive(Clone)]
pub struct Bucket {
    client: ApiClient,
    base_url: String,
    name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
}

/// The direct children of a folder.
#[derive(Clone, Default)]
pub struct ListResult {
    /// Sub-folders, e.g. `images/thumbs/`.
    pub prefixes: Vec<String>,
    pub items: Vec<File>,
}

impl Bucket {
    pub(crate) fn new(client: ApiClient, base_url: String, name: String) -> Self {
        Self {
            client,
            base_url,
            name,
        }
    }

    /// Returns the name of the bucket.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets a `File` instance that refers to the file at the specified path.
    ///
    /// # Arguments
    ///
    /// * `name` - The path to the file within the bucket (e.g., "images/profile.png").
    pub fn file(&self, name: &str) -> File {
        File::new(
            self.client.clone(),
            self.base_url.clone(),
            self.name.clone(),
            name.trim_start_matches('/').to_string(),
        )
    }

    /// Lists everything directly under `folder` (e.g. "images"), following page tokens.
    pub async fn list(&self, folder: &str) -> Result<ListResult, StorageError> {
        let folder = folder.trim_matches('/');
        let prefix = if folder.is_empty() {
            String::new()
        } else {
            format!("{}/", folder)
        };
        let url = format!("{}/b/{}/o", self.base_url, self.name);

        let mut result = ListResult::default();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![("prefix", prefix.clone()), ("delimiter", "/".to_string())];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let response = self.client.get(&url).query(&params).send().await?;

            if !response.status().is_success() {
                return Err(StorageError::ApiError(
                    parse_error_response(response, "List files failed").await,
                ));
            }

            let page: ListResponse = response.json().await?;
            result.prefixes.extend(page.prefixes);
            result
                .items
                .extend(page.items.into_iter().map(|item| self.file(&item.name)));

            match page.next_page_token {
                Some(token) if !token.is_empty() && page_token.as_ref() != Some(&token) => {
                    page_token = Some(token)
                }
                _ => break,
            }
        }

        Ok(result)
    }
}
