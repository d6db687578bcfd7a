use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use payhook_engine::{ReconcilerApi, SqliteDatabase};

use crate::{
    config::ServerConfig,
    dispatch_worker::{start_dispatch_worker, HttpNotifier},
    errors::ServerError,
    routes::{health, PaygateCallbackRoute, PsifiWebhookRoute, StripeWebhookRoute},
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let notifier = HttpNotifier::new(&config.notify);
    let _worker = start_dispatch_worker(db.clone(), notifier, config.outbox_poll_interval);
    let srv = create_server_instance(config, db)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(config: ServerConfig, db: SqliteDatabase) -> Result<Server, ServerError> {
    let host = config.host.clone();
    let port = config.port;
    let srv = HttpServer::new(move || {
        let api = ReconcilerApi::new(db.clone());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("phk::access_log"))
            .app_data(web::Data::new(api))
            .app_data(web::Data::new(config.clone()))
            .service(health)
            .service(StripeWebhookRoute::<SqliteDatabase>::new())
            .service(PsifiWebhookRoute::<SqliteDatabase>::new())
            .service(PaygateCallbackRoute::<SqliteDatabase>::new())
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}
