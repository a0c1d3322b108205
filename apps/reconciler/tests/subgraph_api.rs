use alloy::primitives::U256;
use mockito::{Matcher, Server};
use reconciler::models::{PluginType, ProposalStatus, VoteOption};
use reconciler::source::{FetchError, ProposalQuery, ProposalSource, SubgraphApi};
use serde_json::json;

#[tokio::test]
async fn test_fetch_token_voting_proposals() {
    let mut server = Server::new_async().await;
    let api = SubgraphApi::new_with_endpoint(server.url());

    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({
            "variables": { "dao": "0xdao", "first": 10, "skip": 0 }
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"
            {
                "data": {
                    "tokenVotingProposals": [
                        {
                            "id": "0xplugin_0x2",
                            "dao": { "id": "0xdao" },
                            "title": "Fund grants round",
                            "yes": "340282366920938463463374607431768211456",
                            "no": "1",
                            "abstain": null,
                            "executed": true,
                            "createdAt": "1700000000",
                            "startDate": "1700000000",
                            "endDate": "1700600000",
                            "voters": [ { "voter": { "address": "0xAlice" } } ]
                        },
                        {
                            "id": "0xplugin_0x1",
                            "dao": { "id": "0xdao" },
                            "title": null,
                            "yes": "0",
                            "no": "0",
                            "abstain": "0",
                            "executed": false,
                            "createdAt": "1600000000",
                            "startDate": "1600000000",
                            "endDate": "1600600000",
                            "voters": []
                        }
                    ]
                }
            }
            "#,
        )
        .create_async()
        .await;

    let query = ProposalQuery::newest("0xDAO", PluginType::TokenVoting, 10);
    let proposals = api.get_proposals(&query).await.unwrap();

    assert_eq!(proposals.len(), 2);
    assert_eq!(proposals[0].id, "0xplugin_0x2");
    assert_eq!(proposals[0].status, ProposalStatus::Executed);
    assert_eq!(
        proposals[0].result.get(VoteOption::Yes),
        U256::from(1u8) << 128
    );
    assert!(proposals[0].has_voter("0xalice"));
    assert!(proposals[0].is_token_based);
    assert_eq!(proposals[1].status, ProposalStatus::Defeated);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_fetch_single_multisig_proposal() {
    let mut server = Server::new_async().await;
    let api = SubgraphApi::new_with_endpoint(server.url());

    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({
            "variables": { "id": "0xmultisig_0x0" }
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"
            {
                "data": {
                    "multisigProposal": {
                        "id": "0xmultisig_0x0",
                        "dao": { "id": "0xdao" },
                        "title": "Add signer",
                        "approvals": 2,
                        "minApprovals": 2,
                        "executed": false,
                        "createdAt": "1600000000",
                        "startDate": "1600000000",
                        "endDate": "1600600000",
                        "approvers": [
                            { "approver": { "address": "0xa" } },
                            { "approver": { "address": "0xb" } }
                        ]
                    }
                }
            }
            "#,
        )
        .create_async()
        .await;

    let proposal = api
        .get_proposal(PluginType::Multisig, "0xmultisig_0x0")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(proposal.plugin, PluginType::Multisig);
    assert!(!proposal.is_token_based);
    assert_eq!(proposal.status, ProposalStatus::Succeeded);
    assert_eq!(proposal.result.get(VoteOption::Approved), U256::from(2u64));
    assert_eq!(proposal.voters, vec!["0xa", "0xb"]);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_missing_proposal_is_none() {
    let mut server = Server::new_async().await;
    let api = SubgraphApi::new_with_endpoint(server.url());

    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{ "data": { "tokenVotingProposal": null } }"#)
        .create_async()
        .await;

    let proposal = api
        .get_proposal(PluginType::TokenVoting, "0xplugin_0x9")
        .await
        .unwrap();
    assert!(proposal.is_none());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_http_error_status() {
    let mut server = Server::new_async().await;
    let api = SubgraphApi::new_with_endpoint(server.url());

    let mock = server
        .mock("POST", "/")
        .with_status(400)
        .with_body("bad query")
        .create_async()
        .await;

    let query = ProposalQuery::newest("0xdao", PluginType::TokenVoting, 10);
    let err = api.get_proposals(&query).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::Status {
            status: 400,
            body: "bad query".to_string(),
        }
    );

    mock.assert_async().await;
}

#[tokio::test]
async fn test_graphql_errors_are_surfaced() {
    let mut server = Server::new_async().await;
    let api = SubgraphApi::new_with_endpoint(server.url());

    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{ "data": null, "errors": [ { "message": "indexing_error" }, { "message": "store error" } ] }"#,
        )
        .create_async()
        .await;

    let query = ProposalQuery::newest("0xdao", PluginType::Multisig, 10);
    let err = api.get_proposals(&query).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::GraphQl("indexing_error; store error".to_string())
    );

    mock.assert_async().await;
}

#[tokio::test]
async fn test_malformed_payload_is_decode_error() {
    let mut server = Server::new_async().await;
    let api = SubgraphApi::new_with_endpoint(server.url());

    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"
            {
                "data": {
                    "tokenVotingProposals": [
                        {
                            "id": "0xplugin_0x1",
                            "dao": { "id": "0xdao" },
                            "title": null,
                            "yes": "not-a-number",
                            "no": "0",
                            "abstain": "0",
                            "executed": false,
                            "createdAt": "1",
                            "startDate": "1",
                            "endDate": "2"
                        }
                    ]
                }
            }
            "#,
        )
        .create_async()
        .await;

    let query = ProposalQuery::newest("0xdao", PluginType::TokenVoting, 10);
    let err = api.get_proposals(&query).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)));

    mock.assert_async().await;
}
