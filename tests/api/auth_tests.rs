use actix_web::http::StatusCode;
use actix_web::{App, test, web};
use fleet_guardian::FleetController;
use fleet_guardian::api::auth::Authentication;
use fleet_guardian::api::configure;
use std::sync::Arc;

fn test_data() -> web::Data<Arc<FleetController>> {
    web::Data::new(Arc::new(FleetController::from_config_str("{}").unwrap()))
}

#[actix_web::test]
async fn test_missing_token_is_rejected() {
    let app = test::init_service(
        App::new()
            .wrap(Authentication::new(Some("s3cret")))
            .app_data(test_data())
            .configure(configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/servers").to_request();
    let err = test::try_call_service(&app, req).await.err().unwrap();
    let resp = err.error_response();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get()
        .uri("/api/servers")
        .insert_header(("Authorization", "Bearer wrong"))
        .to_request();
    let err = test::try_call_service(&app, req).await.err().unwrap();
    assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_valid_token_is_accepted() {
    let app = test::init_service(
        App::new()
            .wrap(Authentication::new(Some("s3cret")))
            .app_data(test_data())
            .configure(configure),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/servers")
        .insert_header(("Authorization", "Bearer s3cret"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_liveness_and_preflight_skip_auth() {
    let app = test::init_service(
        App::new()
            .wrap(Authentication::new(Some("s3cret")))
            .app_data(test_data())
            .configure(configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // Passes authentication; no OPTIONS route exists behind it
    let req = test::TestRequest::default()
        .method(actix_web::http::Method::OPTIONS)
        .uri("/api/servers")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_no_token_configured_allows_everything() {
    let app = test::init_service(
        App::new()
            .wrap(Authentication::new(None))
            .app_data(test_data())
            .configure(configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/fleet/overview").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}
