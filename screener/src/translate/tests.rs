use super::model::test_translator;
use super::rules::translate_for_tests;
use super::{empty_candidate, sanitize_query, QueryTranslator};
use serde_json::json;

#[test]
fn translates_single_condition() {
    let candidate = translate_for_tests("PE less than 15");
    assert_eq!(
        candidate,
        json!({ "filter": { "and": [
            { "field": "pe_ratio", "operator": "<", "value": 15 }
        ]}})
    );
}

#[test]
fn translates_and_conjunction() {
    let candidate = translate_for_tests("PE less than 15 and ROE greater than 20");
    assert_eq!(
        candidate,
        json!({ "filter": { "and": [
            { "field": "pe_ratio", "operator": "<", "value": 15 },
            { "field": "roe", "operator": ">", "value": 20 }
        ]}})
    );
}

#[test]
fn translates_or_branches() {
    let candidate = translate_for_tests("pe below 10 or roe above 30");
    assert_eq!(
        candidate,
        json!({ "filter": { "or": [
            { "and": [ { "field": "pe_ratio", "operator": "<", "value": 10 } ] },
            { "and": [ { "field": "roe", "operator": ">", "value": 30 } ] }
        ]}})
    );
}

#[test]
fn or_branch_keeps_inner_and_group() {
    let candidate =
        translate_for_tests("pe below 10 and roe above 15 or market cap above 1000000");
    let branches = candidate["filter"]["or"].as_array().unwrap();
    assert_eq!(branches.len(), 2);
    assert_eq!(branches[0]["and"].as_array().unwrap().len(), 2);
    assert_eq!(branches[1]["and"].as_array().unwrap().len(), 1);
}

#[test]
fn resolves_operator_synonyms() {
    for (text, op) in [
        ("pe below 15", "<"),
        ("pe under 15", "<"),
        ("pe above 15", ">"),
        ("pe over 15", ">"),
        ("pe at least 15", ">="),
        ("pe at most 15", "<="),
        ("pe less than or equal to 15", "<="),
        ("pe greater than or equal to 15", ">="),
        ("pe not equal to 15", "!="),
        ("pe equal to 15", "="),
    ] {
        let candidate = translate_for_tests(text);
        assert_eq!(
            candidate["filter"]["and"][0]["operator"], *op,
            "for input {text:?}"
        );
    }
}

#[test]
fn resolves_metric_synonyms() {
    for (text, field) in [
        ("p/e below 15", "pe_ratio"),
        ("pe ratio below 15", "pe_ratio"),
        ("net profit above 0", "net_income"),
        ("operating cash flow above 0", "cfo"),
        ("debt to equity below 1", "debt_to_equity"),
        ("return on equity above 20", "roe"),
    ] {
        let candidate = translate_for_tests(text);
        assert_eq!(
            candidate["filter"]["and"][0]["field"], *field,
            "for input {text:?}"
        );
    }
}

#[test]
fn strips_query_preamble() {
    let candidate = translate_for_tests("show stocks with pe below 15");
    assert_eq!(candidate["filter"]["and"][0]["field"], "pe_ratio");

    let candidate = translate_for_tests("companies where roe above 20");
    assert_eq!(candidate["filter"]["and"][0]["field"], "roe");
}

#[test]
fn captures_timeframe_suffix() {
    let candidate = translate_for_tests("eps above 1 in last 4 quarters");
    assert_eq!(
        candidate["filter"]["and"][0]["timeframe"],
        json!({ "type": "quarters", "period": 4, "aggregation": "latest" })
    );

    let candidate = translate_for_tests("revenue above 1000000 in last 2 years");
    assert_eq!(candidate["filter"]["and"][0]["timeframe"]["type"], "years");
}

#[test]
fn unknown_metric_clause_is_dropped_not_fatal() {
    let candidate = translate_for_tests("flux capacitance above 88 and pe below 15");
    let conditions = candidate["filter"]["and"].as_array().unwrap();
    assert_eq!(conditions.len(), 1);
    assert_eq!(conditions[0]["field"], "pe_ratio");
}

#[test]
fn unrecognized_query_yields_empty_filter() {
    assert_eq!(translate_for_tests("tell me a joke"), empty_candidate());
    assert_eq!(translate_for_tests(""), empty_candidate());
    assert_eq!(translate_for_tests("   "), empty_candidate());
}

#[test]
fn fractional_values_survive() {
    let candidate = translate_for_tests("eps above 1.5");
    assert_eq!(candidate["filter"]["and"][0]["value"], json!(1.5));
}

#[test]
fn sanitize_strips_brackets_and_caps_length() {
    assert_eq!(sanitize_query("  pe <b>bold</b> 15  "), "pe bbold/b 15");
    let long = "a".repeat(5000);
    assert_eq!(sanitize_query(&long).len(), super::MAX_QUERY_CHARS);
}

#[tokio::test]
async fn model_translator_parses_chat_completion() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "choices": [ { "message": { "content":
                    "{\"filter\":{\"and\":[{\"field\":\"pe_ratio\",\"operator\":\"<\",\"value\":15}]}}"
                } } ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let translator = test_translator(&server.url());
    let candidate = translator.translate("PE less than 15").await.unwrap();
    assert_eq!(candidate["filter"]["and"][0]["field"], "pe_ratio");
    mock.assert_async().await;
}

#[tokio::test]
async fn model_translator_degrades_to_empty_filter_on_bad_json() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "choices": [ { "message": { "content": "sure! here is your query:" } } ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let translator = test_translator(&server.url());
    let candidate = translator.translate("PE less than 15").await.unwrap();
    assert_eq!(candidate, empty_candidate());
}

#[tokio::test]
async fn model_translator_degrades_to_empty_filter_on_server_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(500)
        .with_body("upstream exploded")
        .create_async()
        .await;

    let translator = test_translator(&server.url());
    let candidate = translator.translate("PE less than 15").await.unwrap();
    assert_eq!(candidate, empty_candidate());
}
