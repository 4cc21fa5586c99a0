use ipaform::Provider;
use ipaform::config::ProviderConfig;
use ipaform::freeipa::IpaRpc;
use ipaform::freeipa::client::FreeIpaClient;
use ipaform::reconcile::Reconciler;
use ipaform::resources::Group;
use ipaform::value::Attr;
use serde_json::{Map, json};
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> ProviderConfig {
    ProviderConfig {
        host: server.uri(),
        username: "admin".into(),
        password: "Secret123".into(),
        insecure: false,
        ca_certificate: None,
    }
}

async fn mount_login(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path("/ipa/session/login_password"))
        .and(body_string_contains("user=admin"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Set-Cookie", "ipa_session=abc123; Path=/ipa"),
        )
        .expect(times)
        .mount(server)
        .await;
}

fn ok_reply(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "result": {"result": result, "value": null, "summary": null},
        "error": null,
        "id": 0,
    }))
}

#[tokio::test]
async fn logs_in_once_and_sends_versioned_calls() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .and(header("Referer", format!("{}/ipa", server.uri()).as_str()))
        .and(header("Cookie", "ipa_session=abc123"))
        .and(body_partial_json(json!({
            "method": "user_show",
            "params": [["jdoe"], {"all": true, "version": "2.251"}],
        })))
        .respond_with(ok_reply(json!({"uid": ["jdoe"], "uidnumber": ["1500"]})))
        .expect(2)
        .mount(&server)
        .await;

    let client = FreeIpaClient::new(&config(&server)).unwrap();
    let mut options = Map::new();
    options.insert("all".into(), json!(true));
    for _ in 0..2 {
        let res = client.call("user_show", vec![json!("jdoe")], options.clone()).await.unwrap();
        let record = res.record();
        assert_eq!(record.string("uid").as_deref(), Some("jdoe"));
        assert_eq!(record.int("uidnumber"), Some(1500));
    }
}

#[tokio::test]
async fn server_errors_become_client_errors() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": null,
            "error": {"code": 4001, "name": "NotFound", "message": "jdoe: user not found"},
            "id": 0,
        })))
        .mount(&server)
        .await;

    let client = FreeIpaClient::new(&config(&server)).unwrap();
    let err = client.call("user_show", vec![json!("jdoe")], Map::new()).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.summary(), "Client Error");
    assert_eq!(err.to_string(), "jdoe: user not found");
}

#[tokio::test]
async fn expired_session_logs_in_again() {
    let server = MockServer::start().await;
    mount_login(&server, 2).await;
    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .respond_with(ok_reply(json!({"cn": ["devs"]})))
        .expect(1)
        .mount(&server)
        .await;

    let client = FreeIpaClient::new(&config(&server)).unwrap();
    let res = client.call("group_show", vec![json!("devs")], Map::new()).await.unwrap();
    assert_eq!(res.record().string("cn").as_deref(), Some("devs"));
}

#[tokio::test]
async fn rejected_credentials_are_a_configuration_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ipa/session/login_password"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = FreeIpaClient::new(&config(&server)).unwrap();
    let err = client.call("ping", Vec::new(), Map::new()).await.unwrap_err();
    assert_eq!(err.summary(), "Provider Configuration");
}

#[tokio::test]
async fn missing_ca_certificate_fails_setup() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let cfg = ProviderConfig {
        ca_certificate: Some(dir.path().join("ca.crt")),
        ..config(&server)
    };
    let err = FreeIpaClient::new(&cfg).err().unwrap();
    assert_eq!(err.summary(), "Provider Configuration");
    assert!(err.to_string().contains("ca.crt"));
}

#[tokio::test]
async fn group_create_through_the_provider() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .and(body_partial_json(json!({
            "method": "group_add",
            "params": [["devs"], {"description": "Developers", "version": "2.251"}],
        })))
        .respond_with(ok_reply(json!({"cn": ["devs"], "gidnumber": ["20001"]})))
        .expect(1)
        .mount(&server)
        .await;

    let provider = Provider::connect(&config(&server)).unwrap();
    let plan = Group {
        description: Attr::Known("Developers".into()),
        ..Group::new("devs")
    };
    let state = provider.groups().create(plan).await.unwrap();
    assert_eq!(state.id, Attr::Known("devs".into()));
    assert_eq!(state.gid_number, Attr::Unset);
}
