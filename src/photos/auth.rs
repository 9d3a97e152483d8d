//! OAuth credentials for the photo library.
//!
//! The refresh token is cached in a local JSON file. When that file is missing or
//! unreadable a one-off installed-app flow runs in the browser and its result is
//! cached for every later run.

use crate::photos::PhotosError;
use actix_web::dev::Server;
use actix_web::web::{Data, Query};
use actix_web::{get, App, HttpResponse, HttpServer};
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tokio::sync::oneshot;
use url::Url;

const REDIRECT_ADDR: &str = "localhost:8080";
const REDIRECT_URI: &str = "http://localhost:8080/";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SUCCESS_MESSAGE: &str = "The auth flow is complete; you may close this window.";
const REFUSED_MESSAGE: &str = "Authorization was refused; you may close this window.";

fn default_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/photoslibrary".to_string(),
        "https://www.googleapis.com/auth/photoslibrary.sharing".to_string(),
    ]
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientParams {
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Where the refreshed token is cached between runs
    pub scoped_credentials_file: PathBuf,
    /// Client secrets downloaded from the cloud console, needed only for the browser flow
    #[serde(default)]
    pub client_file: Option<PathBuf>,
    /// Seeds the cache file, for deployments where nobody can open a browser
    #[serde(default)]
    pub credentials: Option<StoredCredentials>,
}

/// Contents of the scoped credentials file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default)]
    pub token: Option<String>,
    pub refresh_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
}

impl StoredCredentials {
    /// `None` when the file is missing or not in the expected format.
    pub async fn load(path: &Path) -> Option<Self> {
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                debug!("Error opening auth token file - {}", e);
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                debug!("Error loading auth tokens - Incorrect format: {}", e);
                None
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), PhotosError> {
        let text = serde_json::to_string(self)?;
        fs::write(path, text)
            .await
            .map_err(|e| PhotosError::FileError(path.to_path_buf(), e))
    }
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ClientSecrets {
    pub async fn load(path: &Path) -> Result<Self, PhotosError> {
        let text = fs::read_to_string(path)
            .await
            .map_err(|e| PhotosError::FileError(path.to_path_buf(), e))?;
        let file: ClientSecretsFile = serde_json::from_str(&text)?;
        file.installed
            .or(file.web)
            .ok_or_else(|| PhotosError::Auth("client file has no installed or web section".into()))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Produces a fresh access token, caching the credentials it used.
pub async fn authorize(http: &Client, params: &ClientParams) -> Result<String, PhotosError> {
    let path = &params.scoped_credentials_file;
    if let Some(credentials) = &params.credentials {
        credentials.save(path).await?;
    }
    let credentials = match StoredCredentials::load(path).await {
        Some(cached) => refresh(http, cached).await?,
        None => interactive(http, params).await?,
    };
    credentials.save(path).await?;
    credentials
        .token
        .ok_or_else(|| PhotosError::Auth("token endpoint returned no access token".into()))
}

async fn request_token(
    http: &Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, PhotosError> {
    let response = http.post(token_uri).form(form).send().await?;
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(PhotosError::BadResponse(status.as_u16(), text));
    }
    Ok(serde_json::from_str(&text)?)
}

async fn refresh(
    http: &Client,
    mut credentials: StoredCredentials,
) -> Result<StoredCredentials, PhotosError> {
    let response = request_token(
        http,
        &credentials.token_uri,
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", &credentials.refresh_token),
            ("client_id", &credentials.client_id),
            ("client_secret", &credentials.client_secret),
        ],
    )
    .await?;
    debug!("Refreshed photo library access token");
    credentials.token = Some(response.access_token);
    if let Some(refresh_token) = response.refresh_token {
        credentials.refresh_token = refresh_token;
    }
    if response.id_token.is_some() {
        credentials.id_token = response.id_token;
    }
    Ok(credentials)
}

pub fn authorization_url(secrets: &ClientSecrets, scopes: &[String]) -> Result<Url, PhotosError> {
    let mut url = Url::parse(&secrets.auth_uri)
        .map_err(|e| PhotosError::Auth(format!("invalid auth_uri: {e}")))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &secrets.client_id)
        .append_pair("redirect_uri", REDIRECT_URI)
        .append_pair("scope", &scopes.join(" "))
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");
    Ok(url)
}

#[derive(Deserialize)]
struct RedirectQuery {
    code: Option<String>,
    error: Option<String>,
}

type CodeSender = Mutex<Option<oneshot::Sender<Result<String, PhotosError>>>>;

/// Answers the browser's redirect. Requests carrying neither `code` nor `error`
/// (preconnects, `/?` reloads) are answered without consuming the flow.
#[get("/")]
async fn redirect(query: Query<RedirectQuery>, sender: Data<CodeSender>) -> HttpResponse {
    let query = query.into_inner();
    let outcome = match (query.code, query.error) {
        (_, Some(error)) => Err(PhotosError::Auth(format!("consent refused: {error}"))),
        (Some(code), None) => Ok(code),
        (None, None) => return HttpResponse::BadRequest().body("Missing authorization code"),
    };
    let refused = outcome.is_err();
    match sender.lock().ok().and_then(|mut sender| sender.take()) {
        Some(sender) => {
            sender.send(outcome).ok();
        }
        None => debug!("Ignoring repeated redirect"),
    }
    if refused {
        return HttpResponse::Ok().body(REFUSED_MESSAGE);
    }
    HttpResponse::Ok().body(SUCCESS_MESSAGE)
}

/// One-shot local HTTP server receiving the authorization redirect.
pub struct RedirectReceiver {
    server: Server,
    addr: SocketAddr,
    outcome: oneshot::Receiver<Result<String, PhotosError>>,
}

impl RedirectReceiver {
    pub fn bind(addr: &str) -> Result<Self, PhotosError> {
        let (sender, outcome) = oneshot::channel();
        let sender: Data<CodeSender> = Data::new(Mutex::new(Some(sender)));
        let server = HttpServer::new(move || {
            App::new()
                .app_data(sender.clone())
                .service(redirect)
        })
        .workers(1)
        .disable_signals()
        .bind(addr)
        .map_err(PhotosError::Redirect)?;
        let addr = server
            .addrs()
            .first()
            .copied()
            .ok_or_else(|| PhotosError::Auth(format!("nothing bound on {addr}")))?;
        Ok(Self {
            server: server.run(),
            addr,
            outcome,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serves until a redirect with a code or an error arrives, then shuts the server down.
    pub async fn code(self) -> Result<String, PhotosError> {
        let handle = self.server.handle();
        let mut server = Box::pin(self.server);
        let outcome = tokio::select! {
            stopped = &mut server => {
                stopped.map_err(PhotosError::Redirect)?;
                return Err(PhotosError::Auth("redirect server stopped before a code arrived".into()));
            }
            received = self.outcome => received.unwrap_or_else(|_| {
                Err(PhotosError::Auth("redirect handler went away".into()))
            }),
        };
        let (_, stopped) = tokio::join!(handle.stop(true), server);
        if let Err(e) = stopped {
            warn!("Redirect server did not stop cleanly: {}", e);
        }
        outcome
    }
}

async fn interactive(http: &Client, params: &ClientParams) -> Result<StoredCredentials, PhotosError> {
    let client_file = params.client_file.as_ref().ok_or_else(|| {
        PhotosError::Auth(format!(
            "no usable credentials in {} and no client_file to authorize with",
            params.scoped_credentials_file.display()
        ))
    })?;
    let secrets = ClientSecrets::load(client_file).await?;
    let url = authorization_url(&secrets, &params.scopes)?;
    let receiver = RedirectReceiver::bind(REDIRECT_ADDR)?;
    info!("Authorize photo library access at: {}", url);
    if let Err(e) = open::that(url.as_str()) {
        warn!("Unable to open a browser: {}", e);
    }
    let code = receiver.code().await?;
    let response = request_token(
        http,
        &secrets.token_uri,
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("client_id", &secrets.client_id),
            ("client_secret", &secrets.client_secret),
            ("redirect_uri", REDIRECT_URI),
        ],
    )
    .await?;
    let refresh_token = response
        .refresh_token
        .ok_or_else(|| PhotosError::Auth("token endpoint returned no refresh token".into()))?;
    Ok(StoredCredentials {
        token: Some(response.access_token),
        refresh_token,
        id_token: response.id_token,
        scopes: params.scopes.clone(),
        token_uri: secrets.token_uri,
        client_id: secrets.client_id,
        client_secret: secrets.client_secret,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> StoredCredentials {
        StoredCredentials {
            token: Some("ya29.token".into()),
            refresh_token: "1//refresh".into(),
            id_token: None,
            scopes: default_scopes(),
            token_uri: default_token_uri(),
            client_id: "client.apps.googleusercontent.com".into(),
            client_secret: "secret".into(),
        }
    }

    #[tokio::test]
    async fn cached_credentials_survive_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth_creds.json");
        credentials().save(&path).await.unwrap();
        assert_eq!(StoredCredentials::load(&path).await, Some(credentials()));
    }

    #[tokio::test]
    async fn missing_or_malformed_cache_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth_creds.json");
        assert_eq!(StoredCredentials::load(&path).await, None);
        std::fs::write(&path, "{\"token\": 1}").unwrap();
        assert_eq!(StoredCredentials::load(&path).await, None);
    }

    #[test]
    fn inline_credentials_deserialize_with_defaults() {
        let params: ClientParams = serde_yaml::from_str(
            r#"
scoped_credentials_file: ./auth_creds.json
credentials:
  refresh_token: r
  client_id: id
  client_secret: s
"#,
        )
        .unwrap();
        assert_eq!(params.scopes, default_scopes());
        let credentials = params.credentials.unwrap();
        assert_eq!(credentials.token, None);
        assert_eq!(credentials.token_uri, DEFAULT_TOKEN_URI);
    }

    #[tokio::test]
    async fn client_secrets_accept_installed_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(
            &path,
            r#"{"installed":{"client_id":"id","client_secret":"s","redirect_uris":["http://localhost"]}}"#,
        )
        .unwrap();
        let secrets = ClientSecrets::load(&path).await.unwrap();
        assert_eq!(secrets.client_id, "id");
        assert_eq!(secrets.auth_uri, DEFAULT_AUTH_URI);

        let url = authorization_url(&secrets, &["a".into(), "b".into()]).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("scope".into(), "a b".into())));
        assert!(pairs.contains(&("redirect_uri".into(), REDIRECT_URI.into())));
        assert!(pairs.contains(&("access_type".into(), "offline".into())));
    }

    #[actix_web::test]
    async fn redirect_server_waits_past_stray_requests() {
        let receiver = RedirectReceiver::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr();
        let base = format!("http://{}", addr);
        let browser = async {
            // A browser preconnect opens a socket and sends nothing.
            drop(tokio::net::TcpStream::connect(addr).await.unwrap());
            let http = Client::new();
            let favicon = http.get(format!("{base}/favicon.ico")).send().await.unwrap();
            assert_eq!(favicon.status(), 404);
            let bare = http.get(format!("{base}/")).send().await.unwrap();
            assert_eq!(bare.status(), 400);
            let done = http
                .get(format!("{base}/?code=4%2F0Ab&scope=x"))
                .send()
                .await
                .unwrap();
            assert_eq!(done.status(), 200);
            assert_eq!(done.text().await.unwrap(), SUCCESS_MESSAGE);
        };
        let (code, ()) = tokio::join!(receiver.code(), browser);
        assert_eq!(code.unwrap(), "4/0Ab");
    }

    #[actix_web::test]
    async fn refused_consent_ends_the_flow() {
        let receiver = RedirectReceiver::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/?error=access_denied", receiver.local_addr());
        let browser = async {
            let response = Client::new().get(url).send().await.unwrap();
            assert_eq!(response.status(), 200);
        };
        let (code, ()) = tokio::join!(receiver.code(), browser);
        assert!(matches!(code, Err(PhotosError::Auth(m)) if m.contains("access_denied")));
    }

    #[actix_web::test]
    async fn occupied_redirect_port_is_a_socket_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        assert!(matches!(
            RedirectReceiver::bind(&addr),
            Err(PhotosError::Redirect(_))
        ));
    }

    #[tokio::test]
    async fn authorize_without_cache_or_client_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let params = ClientParams {
            scopes: default_scopes(),
            scoped_credentials_file: dir.path().join("auth_creds.json"),
            client_file: None,
            credentials: None,
        };
        let result = authorize(&Client::new(), &params).await;
        assert!(matches!(result, Err(PhotosError::Auth(_))));
    }
}
