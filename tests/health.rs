use storefront_api::routes::health::health_report;

#[tokio::test]
async fn health_report_when_database_is_up() {
    let response = health_report(true);
    assert_eq!(response.message, "Health check");

    let data = response.data.expect("health data");
    assert_eq!(data.status, "ok");
    assert_eq!(data.database, "up");
}

#[tokio::test]
async fn health_report_when_database_is_down() {
    let data = health_report(false).data.expect("health data");
    assert_eq!(data.status, "degraded");
    assert_eq!(data.database, "down");
}
