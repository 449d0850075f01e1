//! API integration tests
//!
//! They need a running server with an `admin`/`admin` superuser:
//! `scriptly-admin createuser admin --password admin --superuser`.

use reqwest::{multipart, Client};
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";

const GREETER: &str = r#"import argparse
parser = argparse.ArgumentParser()
parser.add_argument("--who", required=True)
parser.add_argument("--shout", action="store_true")
args = parser.parse_args()
message = "hello " + args.who
print(message.upper() if args.shout else message)
"#;

const GREETER_SCHEMA: &str = r#"{
    "name": "Integration Greeter",
    "description": "Says hello",
    "version": "1",
    "inputs": {
        "": [
            {
                "group": "options",
                "nodes": [
                    {"name": "who", "param": "--who", "model": "CharField", "required": true},
                    {"name": "shout", "param": "--shout", "model": "BooleanField", "type": "checkbox"}
                ]
            }
        ]
    }
}"#;

const LINE_TOOL: &str = r#"import argparse
parser = argparse.ArgumentParser()
parser.add_argument("--input")
actions = parser.add_subparsers(dest="action")
actions.add_parser("summary")
args = parser.parse_args()
print(args.action)
"#;

const LINE_TOOL_SCHEMA: &str = r#"{
    "name": "Integration Line Tool",
    "description": "Subparser without fields and a file input",
    "version": "1",
    "inputs": {
        "": [
            {
                "group": "files",
                "nodes": [
                    {"name": "input", "param": "--input", "model": "FileField", "type": "file"}
                ]
            }
        ],
        "summary": []
    }
}"#;

/// Helper to get an authenticated client
async fn get_auth_token(client: &Client) -> String {
    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({
            "username": "admin",
            "password": "admin"
        }))
        .send()
        .await
        .expect("Failed to send login request");

    let body: Value = response.json().await.expect("Failed to parse login response");
    body["token"].as_str().expect("No token in response").to_string()
}

/// Register a script; a 409 means an earlier run already did
async fn register_script(client: &Client, token: &str, source: &str, file_name: &str, schema: &'static str) {
    let form = multipart::Form::new()
        .part(
            "script",
            multipart::Part::bytes(source.as_bytes().to_vec()).file_name(file_name.to_string()),
        )
        .text("schema", schema)
        .text("group", "Integration");

    let response = client
        .post(format!("{}/admin/scripts", BASE_URL))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .expect("Failed to send request");

    assert!(
        response.status() == 201 || response.status() == 409,
        "unexpected status {}",
        response.status()
    );
}

async fn register_greeter(client: &Client, token: &str) {
    register_script(client, token, GREETER, "integration_greeter.py", GREETER_SCHEMA).await;
}

/// Input name of the form field labelled `label`
fn field_name(page: &Value, label: &str) -> String {
    page["form"]["parsers"]
        .as_object()
        .expect("No parsers in form")
        .values()
        .flat_map(|parser| parser["groups"].as_array().cloned().unwrap_or_default())
        .flat_map(|group| group["fields"].as_array().cloned().unwrap_or_default())
        .find(|field| field["label"] == label)
        .and_then(|field| field["name"].as_str().map(str::to_string))
        .expect("Field not found")
}

async fn greeter_page(client: &Client, token: &str) -> Value {
    script_page(client, token, "integration-greeter").await
}

async fn script_page(client: &Client, token: &str, slug: &str) -> Value {
    let response = client
        .get(format!("{}/scripts/{}", BASE_URL, slug))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    response.json().await.expect("Failed to parse response")
}

async fn submit_greeter(client: &Client, token: &str, who: &str) -> Value {
    let page = greeter_page(client, token).await;
    let form = multipart::Form::new()
        .text("scriptly_type", page["form"]["scriptly_type"].to_string())
        .text("job_name", "greeting")
        .text(field_name(&page, "who"), who.to_string())
        .text(field_name(&page, "shout"), "on");

    let response = client
        .post(format!("{}/scripts/submit", BASE_URL))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    response.json().await.expect("Failed to parse response")
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_login() {
    let client = Client::new();

    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({
            "username": "admin",
            "password": "admin"
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["token"].is_string());
    assert_eq!(body["token_type"], "Bearer");
}

#[tokio::test]
#[ignore]
async fn test_login_invalid_credentials() {
    let client = Client::new();

    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({
            "username": "admin",
            "password": "wrong"
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_add_script_requires_auth() {
    let client = Client::new();
    let form = multipart::Form::new().text("schema", GREETER_SCHEMA);

    let response = client
        .post(format!("{}/admin/scripts", BASE_URL))
        .multipart(form)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_script_form() {
    let client = Client::new();
    let token = get_auth_token(&client).await;
    register_greeter(&client, &token).await;

    let page = greeter_page(&client, &token).await;
    assert_eq!(page["script"]["script_name"], "Integration Greeter");
    assert_eq!(page["access"]["valid"], true);
    assert!(page["form"]["scriptly_type"].is_number());
    assert!(field_name(&page, "who").ends_with("-who"));

    let response = client
        .get(format!("{}/scripts/integration-greeter?who=bob", BASE_URL))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");
    let page: Value = response.json().await.expect("Failed to parse response");
    let initial = page["form"]["parsers"]
        .as_object()
        .unwrap()
        .values()
        .flat_map(|p| p["groups"].as_array().cloned().unwrap_or_default())
        .flat_map(|g| g["fields"].as_array().cloned().unwrap_or_default())
        .find(|f| f["label"] == "who")
        .map(|f| f["initial"].clone())
        .unwrap();
    assert_eq!(initial, json!(["bob"]));
}

#[tokio::test]
#[ignore]
async fn test_submit_missing_required_field() {
    let client = Client::new();
    let token = get_auth_token(&client).await;
    register_greeter(&client, &token).await;
    let page = greeter_page(&client, &token).await;

    let form = multipart::Form::new()
        .text("scriptly_type", page["form"]["scriptly_type"].to_string())
        .text("job_name", "incomplete");
    let response = client
        .post(format!("{}/scripts/submit", BASE_URL))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["errors"][field_name(&page, "who")].is_array());
}

#[tokio::test]
#[ignore]
async fn test_submit_and_view_job() {
    let client = Client::new();
    let token = get_auth_token(&client).await;
    register_greeter(&client, &token).await;

    let submitted = submit_greeter(&client, &token, "world").await;
    assert_eq!(submitted["valid"], true);
    assert_eq!(submitted["status"], "completed");

    let job_id = submitted["job_id"].as_i64().unwrap();
    let response = client
        .get(format!("{}/jobs/{}", BASE_URL, job_id))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let job: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(job["stdout"].as_str().map(str::trim), Some("HELLO WORLD"));
    assert!(job["command"].as_str().unwrap().contains("--who world"));
    assert!(job["files"]["archives"].as_array().is_some_and(|a| !a.is_empty()));

    // Shared link by uuid works without credentials
    let response = client
        .get(format!("{}/jobs/uuid/{}", BASE_URL, job["uuid"].as_str().unwrap()))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
}

#[tokio::test]
#[ignore]
async fn test_job_commands() {
    let client = Client::new();
    let token = get_auth_token(&client).await;
    register_greeter(&client, &token).await;
    let job_id = submit_greeter(&client, &token, "again").await["job_id"].as_i64().unwrap();

    let response = client
        .post(format!("{}/jobs/{}/command", BASE_URL, job_id))
        .bearer_auth(&token)
        .json(&json!({"command": "resubmit"}))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_ne!(body["job_id"].as_i64().unwrap(), job_id);

    let response = client
        .post(format!("{}/jobs/{}/command", BASE_URL, job_id))
        .bearer_auth(&token)
        .json(&json!({"command": "stop"}))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 422);

    let response = client
        .post(format!("{}/jobs/{}/command", BASE_URL, job_id))
        .bearer_auth(&token)
        .json(&json!({"command": "delete"}))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let response = client
        .get(format!("{}/jobs/results", BASE_URL))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");
    let results: Value = response.json().await.expect("Failed to parse response");
    assert!(results
        .as_array()
        .unwrap()
        .iter()
        .all(|entry| entry["id"].as_i64() != Some(job_id)));
}

#[tokio::test]
#[ignore]
async fn test_download_archive() {
    let client = Client::new();
    let token = get_auth_token(&client).await;
    register_greeter(&client, &token).await;
    let job_id = submit_greeter(&client, &token, "files").await["job_id"].as_i64().unwrap();

    let job: Value = client
        .get(format!("{}/jobs/{}", BASE_URL, job_id))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    let file_id = job["files"]["archives"][0]["id"].as_i64().expect("No archive");

    let response = client
        .get(format!("{}/files/{}/download", BASE_URL, file_id))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    assert_eq!(response.headers()["content-type"], "application/zip");
    let bytes = response.bytes().await.expect("Failed to read body");
    assert!(bytes.starts_with(b"PK"));
}

#[tokio::test]
#[ignore]
async fn test_all_queues() {
    let client = Client::new();
    let token = get_auth_token(&client).await;

    let response = client
        .get(format!("{}/jobs/queues", BASE_URL))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["totals"]["results"].is_number());
    assert!(body["items"]["global"].is_array());
}

async fn get_job(client: &Client, token: &str, job_id: i64) -> Value {
    client
        .get(format!("{}/jobs/{}", BASE_URL, job_id))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response")
}

#[tokio::test]
#[ignore]
async fn test_subparser_without_fields_survives_resubmit() {
    let client = Client::new();
    let token = get_auth_token(&client).await;
    register_script(&client, &token, LINE_TOOL, "integration_line_tool.py", LINE_TOOL_SCHEMA).await;
    let page = script_page(&client, &token, "integration-line-tool").await;
    let summary_id = page["form"]["parsers"]
        .as_object()
        .expect("No parsers in form")
        .values()
        .find(|parser| parser["name"] == "summary")
        .and_then(|parser| parser["id"].as_i64())
        .expect("No summary parser");

    let form = multipart::Form::new()
        .text("scriptly_type", page["form"]["scriptly_type"].to_string())
        .text("scriptly_parser", summary_id.to_string())
        .text("job_name", "summary");
    let response = client
        .post(format!("{}/scripts/submit", BASE_URL))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let submitted: Value = response.json().await.expect("Failed to parse response");
    let job_id = submitted["job_id"].as_i64().unwrap();

    let job = get_job(&client, &token, job_id).await;
    assert_eq!(job["status"], "completed");
    assert!(job["command"].as_str().unwrap().ends_with("summary"));
    assert_eq!(job["stdout"].as_str().map(str::trim), Some("summary"));

    let response = client
        .post(format!("{}/jobs/{}/command", BASE_URL, job_id))
        .bearer_auth(&token)
        .json(&json!({"command": "resubmit"}))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");

    let copy = get_job(&client, &token, body["job_id"].as_i64().unwrap()).await;
    assert!(copy["command"].as_str().unwrap().ends_with("summary"));
    assert_eq!(copy["stdout"].as_str().map(str::trim), Some("summary"));

    // The clone form preselects the subparser
    let response = client
        .get(format!("{}/scripts/integration-line-tool?job_id={}", BASE_URL, job_id))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");
    let clone: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(clone["form"]["initial_parser"].as_i64(), Some(summary_id));
}

#[tokio::test]
#[ignore]
async fn test_submit_unlinked_stored_file_rejected() {
    let client = Client::new();
    let token = get_auth_token(&client).await;
    register_script(&client, &token, LINE_TOOL, "integration_line_tool.py", LINE_TOOL_SCHEMA).await;
    let page = script_page(&client, &token, "integration-line-tool").await;
    let input = field_name(&page, "input");

    let form = multipart::Form::new()
        .text("scriptly_type", page["form"]["scriptly_type"].to_string())
        .text("job_name", "unlinked-reference")
        .text(input.clone(), "scriptly_files/uploads/never-submitted.txt");
    let response = client
        .post(format!("{}/scripts/submit", BASE_URL))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["errors"][input.as_str()].is_array());

    // Nothing is left behind in the queues
    for list in ["queue/global", "results"] {
        let entries: Value = client
            .get(format!("{}/jobs/{}", BASE_URL, list))
            .bearer_auth(&token)
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse response");
        assert!(entries
            .as_array()
            .unwrap()
            .iter()
            .all(|entry| entry["name"] != "unlinked-reference"));
    }
}
