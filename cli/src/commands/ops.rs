use crate::util::api_request;

pub async fn metrics(api_url: &str) -> i32 {
    api_request(api_url, reqwest::Method::GET, "/api/v1/ops/metrics", None).await
}
