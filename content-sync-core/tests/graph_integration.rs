use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use content_sync_core::content::{Content, ContentRef, NewContent};
use content_sync_core::contract::MockContentClient;
use content_sync_core::duplicate::{duplicate, DuplicateOptions};
use content_sync_core::element::{AssetSource, Element, Image};
use content_sync_core::graph::{walk, ContentGraph};
use content_sync_core::SyncError;

fn content(id: &str, fields: Vec<(&str, Element)>) -> Content {
    Content {
        id: id.into(),
        name: format!("Item {id}"),
        content_type: "product".into(),
        library_id: "lib".into(),
        tags: BTreeSet::new(),
        fields: fields
            .into_iter()
            .map(|(name, element)| (name.to_string(), element))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn refs(ids: &[&str]) -> Element {
    Element::MultiReference(ids.iter().map(|s| s.to_string()).collect())
}

/// Serves `store` and counts fetches per id.
fn client(store: Vec<Content>, fetches: Arc<Mutex<HashMap<String, usize>>>) -> MockContentClient {
    let store: HashMap<String, Content> = store.into_iter().map(|c| (c.id.clone(), c)).collect();
    let mut client = MockContentClient::new();
    client.expect_get().returning(move |id| {
        *fetches.lock().unwrap().entry(id.to_string()).or_default() += 1;
        store.get(id).cloned().ok_or_else(|| SyncError::RemoteRejected {
            status: 404,
            detail: format!("no content {id}"),
        })
    });
    client
}

/// A -> [B, C] via `related`; C -> D via group `bundle.product`; B -> D.
fn diamond() -> Vec<Content> {
    vec![
        content("A", vec![("related", refs(&["B", "C"])), ("title", Element::Text("a".into()))]),
        content("B", vec![("parent", Element::Reference("D".into()))]),
        content(
            "C",
            vec![(
                "bundle",
                Element::Group(BTreeMap::from([(
                    "product".to_string(),
                    Element::Reference("D".into()),
                )])),
            )],
        ),
        content(
            "D",
            vec![(
                "hero",
                Element::Image(Image {
                    display_mode: "cover".into(),
                    source: AssetSource::Remote {
                        id: "img-1".into(),
                        url: Some("https://cdn/img-1".into()),
                    },
                }),
            )],
        ),
    ]
}

#[tokio::test]
async fn walk_builds_tree_and_levels() {
    let fetches = Arc::new(Mutex::new(HashMap::new()));
    let client = client(diamond(), fetches.clone());

    let graph = walk(&client, "A").await.unwrap();

    let root = graph.root();
    assert_eq!(root.id, "A");
    assert_eq!(root.parent, None);
    let related: Vec<&str> = root.children["related"]
        .iter()
        .map(|&n| graph.node(n).unwrap().id.as_str())
        .collect();
    assert_eq!(related, vec!["B", "C"]);

    let c = root.children["related"][1];
    let under_c = &graph.node(c).unwrap().children["bundle.product"];
    assert_eq!(graph.node(under_c[0]).unwrap().id, "D");
    assert_eq!(graph.path_to(under_c[0]), vec!["A", "C", "D"]);

    let levels = graph.levels();
    assert_eq!(levels[&0], vec!["A"]);
    assert_eq!(levels[&1], vec!["B", "C"]);
    assert_eq!(levels[&2], vec!["D", "D"]);

    // D is shared by B and C but fetched once.
    assert_eq!(fetches.lock().unwrap()["D"], 1);
    assert_eq!(graph.nodes().len(), 5);
}

#[tokio::test]
async fn cycles_are_rejected() {
    let store = vec![
        content("A", vec![("related", refs(&["B"]))]),
        content("B", vec![("back", Element::Reference("A".into()))]),
    ];
    let client = client(store, Arc::new(Mutex::new(HashMap::new())));

    let err = walk(&client, "A").await.unwrap_err();
    match err {
        SyncError::ReferenceCycle { path } => assert_eq!(path, vec!["A", "B", "A"]),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn fetch_failure_aborts_the_walk() {
    let store = vec![content("A", vec![("related", refs(&["missing"]))])];
    let client = client(store, Arc::new(Mutex::new(HashMap::new())));
    assert!(matches!(
        walk(&client, "A").await,
        Err(SyncError::RemoteRejected { status: 404, .. })
    ));
}

#[tokio::test]
async fn duplicate_creates_leaves_first_and_remaps_references() {
    let fetches = Arc::new(Mutex::new(HashMap::new()));
    let mut client = client(diamond(), fetches);
    let created: Arc<Mutex<Vec<NewContent>>> = Arc::new(Mutex::new(Vec::new()));
    let log = created.clone();
    client.expect_create().returning(move |new: NewContent| {
        let id = format!("new-{}", new.name.trim_start_matches("Item ").trim_end_matches(" (copy)"));
        log.lock().unwrap().push(new);
        Ok(ContentRef { id })
    });

    let graph: ContentGraph = walk(&client, "A").await.unwrap();
    let duplication = duplicate(&client, &graph, &DuplicateOptions::default())
        .await
        .unwrap();

    assert_eq!(duplication.root, "new-A");
    assert_eq!(duplication.ids.len(), 4);

    let created = created.lock().unwrap();
    let order: Vec<&str> = created.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(order, vec!["Item D (copy)", "Item B (copy)", "Item C (copy)", "Item A (copy)"]);

    assert_eq!(created[3].fields["related"], refs(&["new-B", "new-C"]));
    assert_eq!(created[1].fields["parent"], Element::Reference("new-D".into()));
    match &created[2].fields["bundle"] {
        Element::Group(children) => {
            assert_eq!(children["product"], Element::Reference("new-D".into()))
        }
        other => panic!("unexpected {other:?}"),
    }
    // Copies keep the asset id but not the resolved URL.
    assert_eq!(
        created[0].fields["hero"],
        Element::Image(Image {
            display_mode: "cover".into(),
            source: AssetSource::Remote {
                id: "img-1".into(),
                url: None,
            },
        })
    );
}
