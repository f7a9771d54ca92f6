use phrasecore::oracle::{
    BatchMode, ContextSequence, LocalOracle, NGramOracle, OracleServer, OracleSettings,
    ScoringClient, ServerHandle, TrigramModel,
};
use phrasecore::{
    Aggregator, InputMode, LanguageModel, NGramLanguageModel, OracleError, PhraseTable, ProducerId,
    WeightedModel,
};
use std::time::Duration;

const CORPUS: &[&str] = &[
    "the house is small",
    "the house is big",
    "the home is small",
    "a small house",
];

fn model() -> TrigramModel {
    let mut model = TrigramModel::new();
    model.train(CORPUS);
    model
}

fn start_server() -> ServerHandle {
    let server = OracleServer::bind("127.0.0.1:0", model()).unwrap();
    let (handle, _join) = server.spawn().unwrap();
    handle
}

fn settings(batch_mode: BatchMode) -> OracleSettings {
    OracleSettings {
        batch_mode,
        batch_size: 2,
        retry_delay: Duration::from_millis(10),
        ..OracleSettings::default()
    }
}

fn connect(handle: &ServerHandle, batch_mode: BatchMode) -> ScoringClient<std::net::TcpStream> {
    let addr = handle.local_addr();
    ScoringClient::connect(&addr.ip().to_string(), addr.port(), settings(batch_mode)).unwrap()
}

fn contexts() -> Vec<ContextSequence> {
    [
        vec![Some("the"), Some("house"), Some("is")],
        vec![None, Some("the")],
        vec![Some("house"), None],
        vec![Some("zebra")],
        vec![Some("the"), Some("house"), Some("is")],
        vec![Some("a"), Some("small"), Some("house")],
    ]
    .iter()
    .map(|words| ContextSequence::from_words(words))
    .collect()
}

#[test]
fn test_repeated_score_hits_server_once() {
    let handle = start_server();
    let mut client = connect(&handle, BatchMode::Sequential);
    let ctx = ContextSequence::from_words(&[Some("the"), Some("house"), Some("is")]);

    let first = client.score(&ctx).unwrap();
    let second = client.score(&ctx).unwrap();

    assert_eq!(first, second);
    assert_eq!(client.requests_sent(), 1);
    client.shutdown().unwrap();
    assert_eq!(handle.stats().prob_requests, 1);
}

#[test]
fn test_remote_matches_local_evaluation() {
    let handle = start_server();
    let mut client = connect(&handle, BatchMode::Sequential);
    let mut local = LocalOracle::new(model());

    for ctx in contexts() {
        let remote = client.score(&ctx).unwrap().prob;
        let expected = local.score(&ctx).unwrap().prob;
        assert_eq!(remote, expected, "{ctx:?}");
    }
    client.shutdown().unwrap();
}

#[test]
fn test_batched_and_sequential_agree() {
    let handle = start_server();
    let mut batched = connect(&handle, BatchMode::Batched);
    let mut sequential = connect(&handle, BatchMode::Sequential);
    let contexts = contexts();

    let a = batched.score_batch(&contexts).unwrap();
    let b = sequential.score_batch(&contexts).unwrap();

    assert_eq!(a, b);
    assert_eq!(batched.cache().len(), sequential.cache().len());
    for ctx in &contexts {
        assert_eq!(batched.cache().get(ctx.tokens()).map(|s| s.prob), sequential.cache().get(ctx.tokens()).map(|s| s.prob));
    }

    // Five distinct contexts: three batch lines of up to two, five prob lines.
    let stats = handle.stats();
    assert_eq!(stats.batch_requests, 3);
    assert_eq!(stats.prob_requests, 5);
    assert_eq!(stats.ngrams_scored, 10);

    batched.shutdown().unwrap();
    sequential.shutdown().unwrap();
}

#[test]
fn test_server_gone_is_fatal() {
    let handle = start_server();
    let mut client = connect(&handle, BatchMode::Sequential);
    let ctx = ContextSequence::from_words(&[Some("the")]);
    client.score(&ctx).unwrap();

    // A protocol violation makes the server drop the connection.
    let mut stream = client.into_inner();
    std::io::Write::write_all(&mut stream, b"nonsense\n").unwrap();
    let mut client = ScoringClient::with_stream(stream, settings(BatchMode::Sequential));

    let other = ContextSequence::from_words(&[Some("house")]);
    assert!(client.score(&other).is_err());
    assert!(matches!(client.score(&other), Err(OracleError::Failed)));
}

#[test]
fn test_translate_against_server() {
    let handle = start_server();
    let client = connect(&handle, BatchMode::Batched);

    let table = PhraseTable::from_reader(
        "das haus ||| the house ||| 0.8 0.6\n\
         das haus ||| the home ||| 0.2 0.4\n\
         haus ||| house ||| 1.0 1.0\n"
            .as_bytes(),
    )
    .unwrap();
    let aggregator = Aggregator::new(ProducerId(0), InputMode::Plain);
    let mut lm = NGramLanguageModel::new(ProducerId(1), 0, client);

    let entries = table.translations(&["das", "haus"]);
    lm.prefetch(entries.iter().map(|e| e.target())).unwrap();
    let requests_after_prefetch = handle.stats().batch_requests;

    let mut candidates = Vec::new();
    for entry in entries {
        let mut candidate = entry.materialize();
        let mut models = [WeightedModel::new(&mut lm as &mut dyn LanguageModel, 0.5)];
        aggregator
            .attach(&mut candidate, &entry.components(), &[1.0, 1.0], 1.0, &mut models)
            .unwrap();
        candidates.push(candidate);
    }
    phrasecore::rank(&mut candidates);

    assert_eq!(handle.stats().batch_requests, requests_after_prefetch);
    assert_eq!(handle.stats().prob_requests, 0);
    assert_eq!(candidates[0].phrase().to_string(), "the house");
    assert!(candidates[0].full_score() > candidates[1].full_score());

    lm.into_oracle().shutdown().unwrap();
}
