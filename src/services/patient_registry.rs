use std::time::Duration;

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use sqlx::PgPool;
use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::models::patient::Patient;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid registry URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Registry URL cannot carry a path")]
    CannotBeABase,

    #[error("Registry responded with {0}")]
    UnexpectedStatus(StatusCode),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Source of patient demographics for card lookups
#[derive(Debug, Clone)]
pub enum PatientRegistry {
    Remote(RemoteRegistry),
    /// Reads the local `patients` table
    Local,
}

impl PatientRegistry {
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        match &config.patient_registry_url {
            Some(url) => Ok(PatientRegistry::Remote(RemoteRegistry::new(
                url,
                config.patient_registry_token.clone(),
            )?)),
            None => Ok(PatientRegistry::Local),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PatientRegistry::Remote(_) => "remote",
            PatientRegistry::Local => "local",
        }
    }

    pub async fn fetch_patient(
        &self,
        pool: &PgPool,
        patient_id: &str,
    ) -> Result<Option<Patient>, RegistryError> {
        match self {
            PatientRegistry::Remote(remote) => remote.fetch_patient(patient_id).await,
            PatientRegistry::Local => Ok(Patient::find_by_id(pool, patient_id).await?),
        }
    }

    /// The local registry shares the database, which is checked separately
    pub async fn check_health(&self) -> Result<(), RegistryError> {
        match self {
            PatientRegistry::Remote(remote) => remote.check_health().await,
            PatientRegistry::Local => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteRegistry {
    client: Client,
    base_url: Url,
    token: Option<Secret<String>>,
}

impl RemoteRegistry {
    pub fn new(base_url: &str, token: Option<Secret<String>>) -> Result<Self, RegistryError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(RegistryError::CannotBeABase);
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RegistryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::CannotBeABase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Returns `None` when the registry does not know the patient
    pub async fn fetch_patient(&self, patient_id: &str) -> Result<Option<Patient>, RegistryError> {
        let url = self.endpoint(&["patients", patient_id])?;
        let response = self.get(url).send().await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json::<Patient>().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                tracing::warn!(%status, "Patient registry request failed");
                Err(RegistryError::UnexpectedStatus(status))
            }
        }
    }

    pub async fn check_health(&self) -> Result<(), RegistryError> {
        let url = self.endpoint(&["health"])?;
        let response = self.get(url).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RegistryError::UnexpectedStatus(response.status()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_patient_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/patients/P-100"))
            .and(header("authorization", "Bearer registry-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "P-100",
                "name": "Ada Lovelace",
                "dateOfBirth": "1815-12-10",
                "gender": "female",
                "phone": null,
                "email": "ada@example.org",
                "address": null,
                "photoUrl": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let registry = RemoteRegistry::new(
            &format!("{}/api/", server.uri()),
            Some(Secret::new("registry-token".to_string())),
        )
        .unwrap();

        let patient = registry.fetch_patient("P-100").await.unwrap().unwrap();
        assert_eq!(patient.name, "Ada Lovelace");
        assert_eq!(patient.email.as_deref(), Some("ada@example.org"));
        assert_eq!(
            patient.date_of_birth,
            chrono::NaiveDate::from_ymd_opt(1815, 12, 10)
        );
    }

    #[tokio::test]
    async fn unknown_patient_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/patients/P-404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let registry = RemoteRegistry::new(&server.uri(), None).unwrap();

        assert!(registry.fetch_patient("P-404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_errors_surface_as_unexpected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/patients/P-1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let registry = RemoteRegistry::new(&server.uri(), None).unwrap();

        assert!(matches!(
            registry.fetch_patient("P-1").await,
            Err(RegistryError::UnexpectedStatus(StatusCode::SERVICE_UNAVAILABLE))
        ));
    }

    #[tokio::test]
    async fn health_check_hits_health_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let registry = RemoteRegistry::new(&server.uri(), None).unwrap();

        assert!(registry.check_health().await.is_ok());
    }

    #[test]
    fn patient_ids_are_path_escaped() {
        let registry = RemoteRegistry::new("http://registry.local/v1", None).unwrap();
        let url = registry.endpoint(&["patients", "a/b c"]).unwrap();

        assert_eq!(url.as_str(), "http://registry.local/v1/patients/a%2Fb%20c");
    }

    #[test]
    fn rejects_unusable_urls() {
        assert!(matches!(
            RemoteRegistry::new("not a url", None),
            Err(RegistryError::InvalidUrl(_))
        ));
        assert!(matches!(
            RemoteRegistry::new("mailto:registry@example.org", None),
            Err(RegistryError::CannotBeABase)
        ));
    }
}
