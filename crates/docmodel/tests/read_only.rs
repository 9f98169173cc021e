//! Read-only documents and read-only embedded values are written once and
//! never updated afterwards.

mod common;

use common::{Container, ReadOnlyDocument, ReadOnlyEmbedded, id_of, session};
use docmodel::GatewayOp;
use docmodel::prelude::*;

fn updates(session: &Session<MemoryGateway>) -> usize {
    session
        .gateway()
        .ops()
        .iter()
        .filter(|op| matches!(op, GatewayOp::Update { .. }))
        .count()
}

#[test]
fn read_only_document_ignores_later_mutations() {
    let mut session = session();
    let doc = doc_ref(ReadOnlyDocument::new("Test1", 1234));
    session.persist(&doc).unwrap();
    session.flush().unwrap();

    {
        let mut d = doc.borrow_mut();
        d.name = "Test2".to_string();
        d.numeric_value = 4321;
    }
    assert!(session.change_set(&doc).unwrap().is_none());
    let result = session.flush().unwrap();
    assert_eq!(result.updated, 0);
    assert_eq!(updates(&session), 0);

    session.clear().unwrap();
    let reloaded = session
        .find::<ReadOnlyDocument>(id_of(&doc))
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.borrow().name, "Test1");
    assert_eq!(reloaded.borrow().numeric_value, 1234);
}

#[test]
fn read_only_embed_one_is_frozen_inside_writable_parent() {
    let mut session = session();
    let container = doc_ref(Container::new("first"));
    container.borrow_mut().embed_one = Some(ReadOnlyEmbedded::new("Test1", 1234));
    session.persist(&container).unwrap();
    session.flush().unwrap();

    {
        let mut c = container.borrow_mut();
        c.label = "second".to_string();
        if let Some(embedded) = c.embed_one.as_mut() {
            embedded.name = "Test2".to_string();
            embedded.numeric_value = 4321;
        }
    }
    let changes = session.change_set(&container).unwrap().unwrap();
    assert_eq!(changes.fields().collect::<Vec<_>>(), vec!["label"]);
    session.flush().unwrap();

    session.clear().unwrap();
    let reloaded = session.find::<Container>(id_of(&container)).unwrap().unwrap();
    let reloaded = reloaded.borrow();
    assert_eq!(reloaded.label, "second");
    assert_eq!(reloaded.embed_one, Some(ReadOnlyEmbedded::new("Test1", 1234)));
}

#[test]
fn read_only_embed_many_is_frozen_inside_writable_parent() {
    let mut session = session();
    let container = doc_ref(Container::new("first"));
    container.borrow_mut().embed_many = vec![ReadOnlyEmbedded::new("Test1", 1234)];
    session.persist(&container).unwrap();
    session.flush().unwrap();

    {
        let mut c = container.borrow_mut();
        c.embed_many[0].name = "Test2".to_string();
        c.embed_many[0].numeric_value = 4321;
    }
    let result = session.flush().unwrap();
    assert_eq!(result.updated, 0);

    session.clear().unwrap();
    let reloaded = session.find::<Container>(id_of(&container)).unwrap().unwrap();
    assert_eq!(
        reloaded.borrow().embed_many,
        vec![ReadOnlyEmbedded::new("Test1", 1234)]
    );
}

#[test]
fn appended_embedded_values_are_written() {
    let mut session = session();
    let container = doc_ref(Container::new("first"));
    container.borrow_mut().embed_many = vec![ReadOnlyEmbedded::new("Test1", 1234)];
    session.persist(&container).unwrap();
    session.flush().unwrap();

    {
        let mut c = container.borrow_mut();
        c.embed_many[0].name = "Test2".to_string();
        c.embed_many.push(ReadOnlyEmbedded::new("Appended", 1));
    }
    assert_eq!(session.flush().unwrap().updated, 1);

    session.clear().unwrap();
    let reloaded = session.find::<Container>(id_of(&container)).unwrap().unwrap();
    assert_eq!(
        reloaded.borrow().embed_many,
        vec![
            ReadOnlyEmbedded::new("Test1", 1234),
            ReadOnlyEmbedded::new("Appended", 1)
        ]
    );
}

fn stored_pair(session: &mut Session<MemoryGateway>) -> DocRef<Container> {
    let container = doc_ref(Container::new("first"));
    container.borrow_mut().embed_many = vec![
        ReadOnlyEmbedded::new("A", 1),
        ReadOnlyEmbedded::new("B", 2),
    ];
    session.persist(&container).unwrap();
    session.flush().unwrap();
    container
}

#[test]
fn removing_a_frozen_embedded_value_is_written() {
    let mut session = session();
    let container = stored_pair(&mut session);

    container.borrow_mut().embed_many.remove(0);
    assert_eq!(session.flush().unwrap().updated, 1);

    session.clear().unwrap();
    let reloaded = session.find::<Container>(id_of(&container)).unwrap().unwrap();
    assert_eq!(reloaded.borrow().embed_many, vec![ReadOnlyEmbedded::new("B", 2)]);
}

#[test]
fn reordering_frozen_embedded_values_is_written() {
    let mut session = session();
    let container = stored_pair(&mut session);

    container.borrow_mut().embed_many.swap(0, 1);
    assert_eq!(session.flush().unwrap().updated, 1);

    session.clear().unwrap();
    let reloaded = session.find::<Container>(id_of(&container)).unwrap().unwrap();
    assert_eq!(
        reloaded.borrow().embed_many,
        vec![ReadOnlyEmbedded::new("B", 2), ReadOnlyEmbedded::new("A", 1)]
    );
}

#[test]
fn embedded_value_assigned_after_insert_is_written_once() {
    let mut session = session();
    let container = doc_ref(Container::new("first"));
    session.persist(&container).unwrap();
    session.flush().unwrap();

    container.borrow_mut().embed_one = Some(ReadOnlyEmbedded::new("Late", 7));
    assert_eq!(session.flush().unwrap().updated, 1);

    if let Some(embedded) = container.borrow_mut().embed_one.as_mut() {
        embedded.numeric_value = 8;
    }
    assert_eq!(session.flush().unwrap().updated, 0);

    session.clear().unwrap();
    let reloaded = session.find::<Container>(id_of(&container)).unwrap().unwrap();
    assert_eq!(reloaded.borrow().embed_one, Some(ReadOnlyEmbedded::new("Late", 7)));
}
