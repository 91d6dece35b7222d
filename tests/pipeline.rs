use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use wiki_fact_extractor::config::{Configuration, PipelineSettings};
use wiki_fact_extractor::core::{ExtractionPipeline, FileSink, KnowledgeContext, MemorySink, TripleKind};
use wiki_fact_extractor::handlers::ArticleReader;
use wiki_fact_extractor::{KnowledgeError, KnowledgeIndex};

const ONTOLOGY: &str = "Agent\tThing\nPerson\tAgent\nScientist\tPerson\nPlace\tThing\nPopulatedPlace\tPlace\nCity\tPopulatedPlace\n";

const ARTICLES: &str = concat!(
    r#"{"wikid":"Albert_Einstein","markup":"'''Albert Einstein''' (born 1879) was born in [[Ulm]]. Albert Einstein worked in [[Bern]], [[Zürich]], [[Prague]] and [[Berlin]].\n{{Infobox scientist|name=Albert Einstein}}\n== Later life ==\nAlbert Einstein died in [[Princeton, New Jersey|Princeton]].\n== References ==\nAlbert Einstein cited [[Ulm]].\n[[Category:Physicists]]"}"#,
    "\n",
    r#"{"wikid":"Ulm","title":"Ulm","markup":"'''Ulm''' is a city on the [[Danube]]."}"#,
    "\n",
    "{broken\n",
    r#"{"wikid":"No_Markup"}"#,
    "\n",
);

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    config_path: PathBuf,
}

fn write_gz(path: &Path, content: &str) {
    let mut encoder = GzEncoder::new(std::fs::File::create(path).unwrap(), Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let data = root.join("data");
    std::fs::create_dir_all(&data).unwrap();

    std::fs::write(data.join("redirects.tsv"), "Princeton\tPrinceton,_New_Jersey\nmalformed line\n").unwrap();
    std::fs::write(
        data.join("relations.tsv"),
        "Albert_Einstein###Ulm\tbirthPlace\nPrinceton###Albert_Einstein\tnotableResident\n",
    )
    .unwrap();
    std::fs::write(data.join("ontology.tsv"), ONTOLOGY).unwrap();
    write_gz(
        &data.join("types_mappingbased.tsv.gz"),
        "Albert_Einstein\tPerson\nAlbert_Einstein\tScientist\nUlm\tCity\n",
    );
    std::fs::write(data.join("types_airpedia.tsv"), "Princeton\tCity\nUlm\tPlace\n").unwrap();
    std::fs::write(data.join("currencies.txt"), "Euro\n").unwrap();
    std::fs::write(root.join("articles.jsonl"), ARTICLES).unwrap();

    let path = |p: &str| root.join(p).display().to_string();
    let config = serde_json::json!({
        "name": "integration",
        "knowledge": {
            "redirects": { "source": path("data/redirects.tsv"), "index": path("indexes/redirects.idx") },
            "relations": { "source": path("data/relations.tsv"), "index": path("indexes/relations.idx") },
            "ontology": path("data/ontology.tsv"),
            "type_sources": [
                { "name": "mappingbased", "source": path("data/types_mappingbased.tsv.gz"), "index": path("indexes/mappingbased.idx") },
                { "name": "airpedia", "source": path("data/types_airpedia.tsv"), "index": path("indexes/airpedia.idx") },
                { "name": "lhd", "source": path("data/missing.tsv"), "index": path("indexes/lhd.idx"), "languages": ["de"] }
            ]
        },
        "blacklists": { "currencies": path("data/currencies.txt") },
        "pipeline": { "workers": 2, "batch_size": 1 },
        "output": { "directory": path("out") }
    });
    let config_path = root.join("config.json");
    std::fs::write(&config_path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    Fixture {
        _dir: dir,
        root,
        config_path,
    }
}

fn load(fixture: &Fixture) -> Configuration {
    let config = Configuration::from_file(&fixture.config_path).unwrap();
    config.validate().unwrap();
    config
}

#[tokio::test]
async fn extracts_grounded_triples_to_files() {
    let fixture = fixture();
    let config = load(&fixture);

    let articles = ArticleReader::new().read(&fixture.root.join("articles.jsonl")).await.unwrap();
    assert_eq!(articles.len(), 2);

    let context = Arc::new(KnowledgeContext::from_config(&config).unwrap());
    let mut sink = FileSink::create(&config.output).await.unwrap();
    let report = ExtractionPipeline::new(context, config.pipeline.clone())
        .with_config_name(config.name.clone())
        .run(articles, &mut sink)
        .await
        .unwrap();
    report.save(sink.directory()).await.unwrap();

    assert_eq!(report.articles_processed, 2);
    assert!(report.dropped.is_empty());
    assert_eq!(report.labeled, 2);
    assert_eq!(report.unlabeled, 0);
    assert_eq!(report.other, 2);
    assert_eq!(report.lists, 1);
    assert_eq!(report.kind_count(TripleKind::Joinable), 2);
    assert_eq!(report.kind_count(TripleKind::Mvl), 1);
    assert_eq!(report.kind_count(TripleKind::JoinableNoTypeObj), 1);

    let out = fixture.root.join("out");
    let labeled = std::fs::read_to_string(out.join("labeled_triples.jsonl")).unwrap();
    let records: Vec<serde_json::Value> = labeled.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    let relations: Vec<&str> = records.iter().filter_map(|r| r["relation"].as_str()).collect();
    assert!(relations.contains(&"birthPlace"));
    assert!(relations.contains(&"notableResident(-1)"));

    let born = records.iter().find(|r| r["relation"] == "birthPlace").unwrap();
    assert_eq!(born["phrase_original"], "was born in");
    assert_eq!(born["type_subject"], "[Scientist]");
    assert_eq!(born["section"], "#Abstract");

    let died = records.iter().find(|r| r["wiki_object"] == "Princeton").unwrap();
    assert_eq!(died["section"], "#Later life");
    assert_eq!(died["type_object"], "[City]");

    let facts = std::fs::read_to_string(out.join(FileSink::NTRIPLES_FILE)).unwrap();
    assert!(facts.contains(
        "<http://dbpedia.org/resource/Princeton> <http://dbpedia.org/ontology/notableResident> <http://dbpedia.org/resource/Albert_Einstein> ."
    ));

    let lists = std::fs::read_to_string(out.join("mvl_collection.jsonl")).unwrap();
    let list: serde_json::Value = serde_json::from_str(lists.trim()).unwrap();
    assert_eq!(list["entities"], serde_json::json!(["Bern", "Zürich", "Prague", "Berlin"]));

    assert!(out.join("report.json").exists());
}

#[tokio::test]
async fn persisted_indexes_are_reused() {
    let fixture = fixture();
    let config = load(&fixture);

    let first = KnowledgeContext::from_config(&config).unwrap();
    let indexes = fixture.root.join("indexes");
    assert!(indexes.join("redirects.idx").exists());
    assert!(indexes.join("mappingbased.idx").exists());
    assert!(!indexes.join("lhd.idx").exists());

    std::fs::remove_file(fixture.root.join("data/relations.tsv")).unwrap();
    std::fs::remove_file(fixture.root.join("data/types_mappingbased.tsv.gz")).unwrap();
    let second = KnowledgeContext::from_config(&config).unwrap();

    for (subject, object) in [("Albert_Einstein", "Ulm"), ("Albert_Einstein", "Princeton")] {
        assert_eq!(
            first.resolver().relations(subject, object),
            second.resolver().relations(subject, object)
        );
    }
    assert_eq!(
        second.resolver().assign_type("Albert_Einstein").to_string(),
        "[Scientist]"
    );
    assert_eq!(second.resolver().resolve("Princeton,_New_Jersey"), "Princeton");

    let loaded = KnowledgeIndex::load(&indexes.join("redirects.idx")).unwrap();
    assert_eq!(loaded.retrieve_values("Princeton"), ["Princeton,_New_Jersey"]);
}

#[tokio::test]
async fn missing_dump_fails_at_construction() {
    let fixture = fixture();
    let config = load(&fixture);
    std::fs::remove_file(fixture.root.join("data/redirects.tsv")).unwrap();

    let err = KnowledgeContext::from_config(&config).unwrap_err();
    let missing = err.downcast_ref::<KnowledgeError>();
    assert!(matches!(missing, Some(KnowledgeError::MissingSource { .. })));
}

#[tokio::test]
async fn in_memory_run_respects_article_limit() {
    let fixture = fixture();
    let config = load(&fixture);
    let articles = ArticleReader::new().read(&fixture.root.join("articles.jsonl")).await.unwrap();

    let context = Arc::new(KnowledgeContext::from_config(&config).unwrap());
    let settings = PipelineSettings {
        workers: 1,
        batch_size: 8,
        article_limit: Some(1),
    };
    let mut sink = MemorySink::new();
    let report = ExtractionPipeline::new(context, settings)
        .run(articles, &mut sink)
        .await
        .unwrap();

    assert_eq!(report.articles_seen, 1);
    let collected = sink.collected();
    assert_eq!(collected.labeled.len(), 2);
    assert_eq!(collected.lists.len(), 1);
    assert!(collected.other.iter().all(|t| t.candidate.wikid == "Albert_Einstein"));
}
