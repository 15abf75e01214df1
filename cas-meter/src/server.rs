use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use prometheus::Encoder;
use tracing::{debug, error, info};

use cas_measure::{BatchDelete, Block, Blockstore, BlockstoreError, Cid, View};

use crate::config::Stores;

type HttpResponse = Response<Full<Bytes>>;

/// A request against one of the served stores.
#[derive(Debug, PartialEq, Eq)]
pub enum Route<'a> {
    Put { store: &'a str },
    Get { store: &'a str, cid: &'a str },
    Head { store: &'a str, cid: &'a str },
    Delete { store: &'a str, cid: &'a str },
    DeleteMany { store: &'a str },
    Keys { store: &'a str },
    Unknown,
}

impl<'a> Route<'a> {
    pub fn parse(method: &Method, path: &'a str) -> Self {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match (method, segments.as_slice()) {
            (&Method::PUT, &[store, "blocks"]) => Route::Put { store },
            (&Method::POST, &[store, "blocks", "delete"]) => Route::DeleteMany { store },
            (&Method::GET, &[store, "blocks", cid]) => Route::Get { store, cid },
            (&Method::HEAD, &[store, "blocks", cid]) => Route::Head { store, cid },
            (&Method::DELETE, &[store, "blocks", cid]) => Route::Delete { store, cid },
            (&Method::GET, &[store, "keys"]) => Route::Keys { store },
            _ => Route::Unknown,
        }
    }
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn error_response(err: &BlockstoreError) -> HttpResponse {
    let status = match err {
        BlockstoreError::NotFound(_) => StatusCode::NOT_FOUND,
        BlockstoreError::InvalidCid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    respond(status, err.to_string())
}

fn parse_cids(body: &[u8]) -> Result<Vec<Cid>, BlockstoreError> {
    String::from_utf8_lossy(body)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::parse)
        .collect()
}

/// Runs a blocking store call off the async workers.
async fn blocking<F>(f: F) -> HttpResponse
where
    F: FnOnce() -> Result<HttpResponse, BlockstoreError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => error_response(&err),
        Err(err) => {
            error!("block store task failed: {err}");
            respond(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

async fn read_body<B>(req: Request<B>) -> Result<Bytes, HttpResponse>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    match req.into_body().collect().await {
        Ok(body) => Ok(body.to_bytes()),
        Err(err) => Err(respond(
            StatusCode::BAD_REQUEST,
            format!("failed to read request body: {err}"),
        )),
    }
}

/// Serves block requests for the configured stores.
pub async fn handle_blocks<B>(
    stores: Arc<Stores>,
    req: Request<B>,
) -> Result<HttpResponse, Infallible>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let path = req.uri().path().to_string();
    let route = Route::parse(req.method(), &path);
    debug!(method = %req.method(), path = %path, ?route, "block request");

    let store_name = match &route {
        Route::Put { store }
        | Route::Get { store, .. }
        | Route::Head { store, .. }
        | Route::Delete { store, .. }
        | Route::DeleteMany { store }
        | Route::Keys { store } => *store,
        Route::Unknown => return Ok(respond(StatusCode::NOT_FOUND, "Not Found")),
    };
    let Some(store) = stores.get(store_name) else {
        return Ok(respond(
            StatusCode::NOT_FOUND,
            format!("unknown store {store_name}"),
        ));
    };

    let cid = match &route {
        Route::Get { cid, .. } | Route::Head { cid, .. } | Route::Delete { cid, .. } => {
            match cid.parse::<Cid>() {
                Ok(cid) => Some(cid),
                Err(err) => return Ok(error_response(&err)),
            }
        }
        _ => None,
    };

    let response = match (route, cid) {
        (Route::Put { .. }, _) => {
            let body = match read_body(req).await {
                Ok(body) => body,
                Err(response) => return Ok(response),
            };
            blocking(move || {
                let block = Block::new(body);
                store.put(&block)?;
                Ok(respond(StatusCode::CREATED, block.cid().to_string()))
            })
            .await
        }
        (Route::Get { .. }, Some(cid)) => {
            blocking(move || {
                let mut payload = Bytes::new();
                store.view(&cid, &mut |data| {
                    payload = Bytes::copy_from_slice(data);
                    Ok(())
                })?;
                Ok(respond(StatusCode::OK, payload))
            })
            .await
        }
        (Route::Head { .. }, Some(cid)) => {
            blocking(move || {
                if !store.has(&cid)? {
                    return Ok(respond(StatusCode::NOT_FOUND, Bytes::new()));
                }
                let size = store.get_size(&cid)?;
                let mut response = respond(StatusCode::OK, Bytes::new());
                response
                    .headers_mut()
                    .insert(CONTENT_LENGTH, HeaderValue::from(size));
                Ok(response)
            })
            .await
        }
        (Route::Delete { .. }, Some(cid)) => {
            blocking(move || {
                store.delete_block(&cid)?;
                Ok(respond(StatusCode::NO_CONTENT, Bytes::new()))
            })
            .await
        }
        (Route::DeleteMany { .. }, _) => {
            let body = match read_body(req).await {
                Ok(body) => body,
                Err(response) => return Ok(response),
            };
            let cids = match parse_cids(&body) {
                Ok(cids) => cids,
                Err(err) => return Ok(error_response(&err)),
            };
            blocking(move || {
                store.delete_many(&cids)?;
                Ok(respond(StatusCode::NO_CONTENT, Bytes::new()))
            })
            .await
        }
        (Route::Keys { .. }, _) => {
            blocking(move || {
                let mut listing = String::new();
                for cid in store.all_keys()? {
                    listing.push_str(&cid?.to_string());
                    listing.push('\n');
                }
                Ok(respond(StatusCode::OK, listing))
            })
            .await
        }
        _ => respond(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

/// Serves the Prometheus scrape endpoint.
pub async fn handle_metrics(req: Request<Incoming>) -> Result<HttpResponse, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let mut buffer = Vec::new();
            let encoder = prometheus::TextEncoder::new();
            let metric_families = prometheus::gather();
            if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
                error!("failed to encode metrics: {err}");
                return Ok(respond(StatusCode::INTERNAL_SERVER_ERROR, "internal error"));
            }

            let mut response = respond(StatusCode::OK, buffer);
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(response)
        }
        _ => Ok(respond(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Listener addresses of the server.
#[derive(Debug, Clone)]
pub struct Listen {
    pub host: String,
    pub port: u16,
    pub metric_host: String,
    pub metric_port: u16,
}

pub async fn run_server(listen: Listen, stores: Stores) -> anyhow::Result<()> {
    let stores = Arc::new(stores);

    let listener = tokio::net::TcpListener::bind((listen.host.as_str(), listen.port)).await?;
    let local_addr = listener.local_addr()?;

    let metrics_listener =
        tokio::net::TcpListener::bind((listen.metric_host.as_str(), listen.metric_port)).await?;
    let metrics_addr = metrics_listener.local_addr()?;

    info!("metrics server is running at http://{metrics_addr}");

    let blocks_service = {
        let stores = stores.clone();
        hyper::service::service_fn(move |req: Request<Incoming>| {
            handle_blocks(stores.clone(), req)
        })
    };
    let metrics_service = hyper::service::service_fn(handle_metrics);

    let http_server = ConnBuilder::new(TokioExecutor::new());
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());

    for name in stores.names() {
        info!("serving store {name} at http://{local_addr}/{name}/blocks");
    }

    loop {
        tokio::select! {
            res = listener.accept() => {
                match res {
                    Ok((socket, _)) => {
                        let conn = http_server.serve_connection(TokioIo::new(socket), blocks_service.clone());
                        let conn = graceful.watch(conn.into_owned());
                        tokio::spawn(async move {
                            let _ = conn.await;
                        });
                    }
                    Err(err) => {
                        error!("error accepting connection: {err}");
                    }
                }
            }
            res = metrics_listener.accept() => {
                match res {
                    Ok((socket, _)) => {
                        let conn = http_server.serve_connection(TokioIo::new(socket), metrics_service);
                        let conn = graceful.watch(conn.into_owned());
                        tokio::spawn(async move {
                            let _ = conn.await;
                        });
                    }
                    Err(err) => {
                        error!("error accepting metrics connection: {err}");
                    }
                }
            }
            _ = ctrl_c.as_mut() => {
                break;
            }
        };
    }

    tokio::select! {
        () = graceful.shutdown() => {
             debug!("Gracefully shutdown!");
        },
        () = tokio::time::sleep(std::time::Duration::from_secs(10)) => {
             debug!("Waited 10 seconds for graceful shutdown, aborting...");
        }
    }

    stores.close_all()?;
    info!("server is stopped");
    Ok(())
}
