//! End-to-end tests: fragments in, resolved model and diagnostics out.

use std::sync::Arc;

use dt_model::{
    BindingResolver, CellValue, Diagnostic, IssueKind, NexusWord, NodeId, NodeType, Runtime,
};
use dt_syntax::{
    ConstExpr, DeleteTarget, Fragment, FragmentKind, Label, LazyExpr, NodeName, Span, SrcId, Value,
};

fn span(at: usize) -> Span {
    Span::new(SrcId(0), at, at.checked_add(1).expect("span offset"))
}

fn int(value: u64) -> Value {
    Value::Int {
        value,
        span: Span::dummy(),
    }
}

fn int_at(value: u64, at: usize) -> Value {
    Value::Int {
        value,
        span: span(at),
    }
}

fn cells(words: &[u64]) -> Vec<Value> {
    words.iter().map(|&w| int(w)).collect()
}

fn string(value: &str) -> Value {
    Value::String {
        value: value.to_owned(),
        span: Span::dummy(),
    }
}

fn prop(name: &str, values: Vec<Value>) -> Fragment {
    prop_at(name, values, 0)
}

fn prop_at(name: &str, values: Vec<Value>, at: usize) -> Fragment {
    Fragment {
        span: span(at),
        kind: FragmentKind::Property {
            name: name.to_owned(),
            values,
        },
    }
}

fn node(name: &str, body: Vec<Fragment>) -> Fragment {
    node_at(name, body, 0)
}

fn node_at(name: &str, body: Vec<Fragment>, at: usize) -> Fragment {
    Fragment {
        span: span(at),
        kind: FragmentKind::Node {
            name: name.parse().expect("node name"),
            labels: Vec::new(),
            body,
        },
    }
}

fn labeled_node(label: &str, label_at: usize, name: &str, body: Vec<Fragment>) -> Fragment {
    Fragment {
        span: Span::dummy(),
        kind: FragmentKind::Node {
            name: name.parse().expect("node name"),
            labels: vec![Label::new(label, span(label_at))],
            body,
        },
    }
}

fn root(body: Vec<Fragment>) -> Fragment {
    root_at(body, 0)
}

fn root_at(body: Vec<Fragment>, at: usize) -> Fragment {
    Fragment {
        span: span(at),
        kind: FragmentKind::Root { body },
    }
}

fn ref_frag(label: &str, label_at: usize, body: Vec<Fragment>) -> Fragment {
    Fragment {
        span: Span::dummy(),
        kind: FragmentKind::Ref {
            label: Label::new(label, span(label_at)),
            body,
        },
    }
}

fn delete_node(name: &str) -> Fragment {
    Fragment {
        span: Span::dummy(),
        kind: FragmentKind::DeleteNode {
            target: DeleteTarget::Name(name.parse().expect("node name")),
        },
    }
}

fn delete_prop(name: &str) -> Fragment {
    Fragment {
        span: Span::dummy(),
        kind: FragmentKind::DeleteProperty {
            name: name.to_owned(),
        },
    }
}

fn cpus() -> Fragment {
    node("cpus", vec![])
}

#[track_caller]
fn build(fragments: Vec<Fragment>) -> Runtime {
    match Runtime::build(fragments) {
        Ok(rt) => rt,
        Err(bug) => panic!("{bug}"),
    }
}

#[track_caller]
fn of_kind(rt: &Runtime, kind: IssueKind) -> Vec<Diagnostic> {
    rt.diagnostics()
        .into_iter()
        .filter(|d| d.kind == kind)
        .collect()
}

#[track_caller]
fn child(rt: &Runtime, path: &str) -> NodeId {
    match rt.get_child(path, false) {
        Some(id) => id,
        None => panic!("no node at {path}"),
    }
}

fn u(value: &CellValue) -> u128 {
    value.as_u128().expect("value fits in u128")
}

#[test]
fn test_reg_grouping_exact_and_partial_tail() {
    let rt = build(vec![root(vec![
        cpus(),
        prop("#address-cells", cells(&[2])),
        prop("#size-cells", cells(&[1])),
        node("dev", vec![prop("reg", cells(&[1, 2, 3, 4, 5, 6, 7]))]),
    ])]);

    let dev = child(&rt, "/dev");
    let regs = rt.reg_array(dev);
    assert_eq!(regs.len(), 2, "trailing partial group is discarded");
    assert_eq!(u(&regs[0].start), 0x1_0000_0002);
    assert_eq!(regs[0].size, CellValue::from(3));
    assert_eq!(u(&regs[1].start), 0x4_0000_0005);
    assert_eq!(regs[1].size, CellValue::from(6));
}

#[test]
fn test_reg_grouping_across_cell_counts() {
    for &(a, s) in &[(1u64, 1u64), (2, 1), (2, 2), (1, 0)] {
        let k = 3usize;
        let per = (a as usize) + (s as usize);
        let words: Vec<u64> = (1..=(k * per) as u64).collect();
        let rt = build(vec![root(vec![
            cpus(),
            prop("#address-cells", cells(&[a])),
            prop("#size-cells", cells(&[s])),
            node("dev", vec![prop("reg", cells(&words))]),
        ])]);

        let regs = rt.reg_array(child(&rt, "/dev"));
        assert_eq!(regs.len(), k, "cells ({a},{s})");
        for (i, entry) in regs.iter().enumerate() {
            let group = &words[i * per..(i + 1) * per];
            let expect = |ws: &[u64]| ws.iter().fold(0u128, |acc, &w| (acc << 32) | u128::from(w));
            assert_eq!(u(&entry.start), expect(&group[..a as usize]));
            assert_eq!(u(&entry.size), expect(&group[a as usize..]));
        }
    }
}

#[test]
fn test_reg_stream_stops_at_unresolved_expression() {
    let rt = build(vec![root(vec![
        cpus(),
        prop("#address-cells", cells(&[1])),
        prop("#size-cells", cells(&[1])),
        node(
            "dev",
            vec![prop(
                "reg",
                vec![
                    int(1),
                    Value::Expr(LazyExpr::new(Span::dummy(), ConstExpr(None))),
                    int(2),
                    int(3),
                ],
            )],
        ),
    ])]);

    assert!(rt.reg_array(child(&rt, "/dev")).is_empty());
}

#[test]
fn test_reg_evaluates_lazy_expressions() {
    let rt = build(vec![root(vec![
        cpus(),
        prop("#address-cells", cells(&[1])),
        prop("#size-cells", cells(&[1])),
        node(
            "dev",
            vec![prop(
                "reg",
                vec![
                    Value::Expr(LazyExpr::new(Span::dummy(), ConstExpr(Some(0x40)))),
                    int(4),
                ],
            )],
        ),
    ])]);

    let regs = rt.reg_array(child(&rt, "/dev"));
    assert_eq!(regs.len(), 1);
    assert_eq!(u(&regs[0].start), 0x40);
}

#[test]
fn test_mapped_reg_through_bus_ranges() {
    let rt = build(vec![root(vec![
        cpus(),
        prop("#address-cells", cells(&[1])),
        prop("#size-cells", cells(&[1])),
        node(
            "bus@0",
            vec![
                prop("#address-cells", cells(&[1])),
                prop("#size-cells", cells(&[1])),
                prop("ranges", cells(&[0, 0x1000, 0x100])),
                node("dev@10", vec![prop("reg", cells(&[0x10, 0x4]))]),
            ],
        ),
    ])]);

    let dev = child(&rt, "/bus@0/dev@10");
    let mapped = rt.mapped_reg(dev);
    assert_eq!(mapped.len(), 1);
    assert_eq!(u(&mapped[0].start), 0x1010);
    assert_eq!(mapped[0].size, CellValue::from(0x4));
    assert!(mapped[0].in_mapping_range);
    assert!(!mapped[0].missing_mapping);

    // Repeated queries are cache-stable.
    let again = rt.mapped_reg(dev);
    assert_eq!(*again, *mapped);
    assert!(of_kind(&rt, IssueKind::MissingMapping).is_empty());
}

#[test]
fn test_mapped_reg_missing_mapping() {
    let rt = build(vec![root(vec![
        cpus(),
        prop("#address-cells", cells(&[1])),
        prop("#size-cells", cells(&[1])),
        node(
            "bus@0",
            vec![
                prop("#address-cells", cells(&[1])),
                prop("#size-cells", cells(&[1])),
                prop("ranges", cells(&[0x100, 0x1000, 0x10])),
                node("dev@10", vec![prop("reg", cells(&[0x10, 0x4]))]),
            ],
        ),
    ])]);

    let mapped = rt.mapped_reg(child(&rt, "/bus@0/dev@10"));
    assert_eq!(mapped.len(), 1);
    assert!(mapped[0].missing_mapping);
    // Translation stopped where the mapping went missing.
    assert_eq!(u(&mapped[0].start), 0x10);
    assert_eq!(of_kind(&rt, IssueKind::MissingMapping).len(), 1);
}

#[test]
fn test_empty_ranges_is_identity_absent_is_terminal() {
    use dt_model::RangeKind;

    let rt = build(vec![root(vec![
        cpus(),
        prop("#address-cells", cells(&[1])),
        prop("#size-cells", cells(&[1])),
        node(
            "bus@0",
            vec![
                prop("#address-cells", cells(&[1])),
                prop("#size-cells", cells(&[1])),
                prop("ranges", vec![]),
                node("dev@5", vec![prop("reg", cells(&[0x5, 0x1]))]),
            ],
        ),
        node("island@0", vec![]),
    ])]);

    let bus = child(&rt, "/bus@0");
    let island = child(&rt, "/island@0");
    let empty = rt.range_map(bus, RangeKind::Ranges).expect("ranges present");
    assert!(empty.is_empty(), "empty ranges is a valid identity mapping");
    assert!(rt.range_map(island, RangeKind::Ranges).is_none());

    // Identity translation carries the address through unchanged.
    let mapped = rt.mapped_reg(child(&rt, "/bus@0/dev@5"));
    assert_eq!(u(&mapped[0].start), 0x5);
    assert!(!mapped[0].missing_mapping);
}

#[test]
fn test_dma_ranges_decode() {
    use dt_model::RangeKind;

    let rt = build(vec![root(vec![
        cpus(),
        prop("#address-cells", cells(&[1])),
        prop("#size-cells", cells(&[1])),
        node(
            "bus@0",
            vec![
                prop("#address-cells", cells(&[1])),
                prop("#size-cells", cells(&[1])),
                prop("dma-ranges", cells(&[0x0, 0x8000, 0x100])),
            ],
        ),
    ])]);

    let bus = child(&rt, "/bus@0");
    let map = rt
        .range_map(bus, RangeKind::DmaRanges)
        .expect("dma-ranges present");
    assert_eq!(map.len(), 1);
    assert_eq!(u(&map[0].child), 0x0);
    assert_eq!(u(&map[0].parent), 0x8000);
    assert_eq!(u(&map[0].size), 0x100);
    // The two tables are independent.
    assert!(rt.range_map(bus, RangeKind::Ranges).is_none());
}

#[test]
fn test_sibling_overlap_is_symmetric() {
    let rt = build(vec![root(vec![
        cpus(),
        prop("#address-cells", cells(&[1])),
        prop("#size-cells", cells(&[1])),
        node(
            "a@0",
            vec![prop("reg", vec![int_at(0x0, 100), int_at(0x10, 101)])],
        ),
        node(
            "b@8",
            vec![prop("reg", vec![int_at(0x8, 200), int_at(0x10, 201)])],
        ),
    ])]);

    let collisions = of_kind(&rt, IssueKind::AddressRangeCollides);
    assert_eq!(collisions.len(), 2, "one diagnostic anchored on each side");

    let a_span = span(100).merge(span(101));
    let b_span = span(200).merge(span(201));
    let on_a = collisions
        .iter()
        .find(|d| d.span == a_span)
        .expect("diagnostic anchored on a@0");
    assert_eq!(on_a.related, vec![b_span]);
    let on_b = collisions
        .iter()
        .find(|d| d.span == b_span)
        .expect("diagnostic anchored on b@8");
    assert_eq!(on_b.related, vec![a_span]);
}

#[test]
fn test_overlap_skips_disabled_children() {
    let rt = build(vec![root(vec![
        cpus(),
        prop("#address-cells", cells(&[1])),
        prop("#size-cells", cells(&[1])),
        node("a@0", vec![prop("reg", cells(&[0x0, 0x10]))]),
        node(
            "b@8",
            vec![
                prop("status", vec![string("disabled")]),
                prop("reg", cells(&[0x8, 0x10])),
            ],
        ),
    ])]);

    assert!(rt.is_disabled(child(&rt, "/b@8")));
    assert!(of_kind(&rt, IssueKind::AddressRangeCollides).is_empty());
}

#[test]
fn test_delete_node_is_idempotent_and_keeps_history() {
    let rt = build(vec![
        root(vec![cpus(), node("uart", vec![prop("x", cells(&[1]))])]),
        root(vec![
            delete_node("uart"),
            delete_node("uart"),
            delete_node("never-existed"),
        ]),
    ]);

    assert!(rt.get_child("/uart", false).is_none());
    let root_node = rt.node(rt.root());
    assert_eq!(root_node.deleted_children().len(), 1);
    // The removed node is retained, subtree intact.
    let deleted = root_node.deleted_children()[0].node;
    assert_eq!(rt.node(deleted).name, "uart");
    assert!(rt.node(deleted).property("x").is_some());
    assert!(!rt.is_live(deleted));
    // Re-deleting and deleting the nonexistent produced nothing extra.
    assert_eq!(of_kind(&rt, IssueKind::NodeDeleted).len(), 1);
}

#[test]
fn test_delete_property_is_idempotent_and_keeps_history() {
    let rt = build(vec![
        root(vec![cpus(), node("dev", vec![prop("clocks", cells(&[7]))])]),
        root(vec![node(
            "dev",
            vec![
                delete_prop("clocks"),
                delete_prop("clocks"),
                delete_prop("never-set"),
            ],
        )]),
    ]);

    let dev = child(&rt, "/dev");
    assert!(rt.node(dev).property("clocks").is_none());
    assert_eq!(rt.node(dev).deleted_properties().len(), 1);
    assert_eq!(of_kind(&rt, IssueKind::PropertyDeleted).len(), 1);
}

#[test]
fn test_property_readded_after_delete_starts_fresh() {
    let rt = build(vec![
        root(vec![cpus(), node("dev", vec![prop("x", cells(&[1]))])]),
        root(vec![node(
            "dev",
            vec![delete_prop("x"), prop("x", cells(&[2]))],
        )]),
    ]);

    let dev = child(&rt, "/dev");
    let live = rt.node(dev).property("x").expect("x is live");
    assert_eq!(rt.property(live).first_word(), Some(2));
    assert!(rt.all_replaced(live).is_empty());
    assert_eq!(rt.node(dev).deleted_properties().len(), 1);
}

#[test]
fn test_property_override_chain() {
    let rt = build(vec![
        root(vec![cpus(), node("dev", vec![prop("x", cells(&[1]))])]),
        root(vec![node("dev", vec![prop("x", cells(&[2]))])]),
        root(vec![node("dev", vec![prop("x", cells(&[3]))])]),
    ]);

    let dev = child(&rt, "/dev");
    let live = rt.node(dev).property("x").expect("x is live");
    assert_eq!(rt.property(live).first_word(), Some(3));

    let history = rt.all_replaced(live);
    assert_eq!(history.len(), 2, "most recent first");
    assert_eq!(rt.property(history[0]).first_word(), Some(2));
    assert_eq!(rt.property(history[1]).first_word(), Some(1));
    assert_eq!(of_kind(&rt, IssueKind::DuplicateProperty).len(), 2);
}

#[test]
fn test_forward_label_reference_respects_total_order() {
    // The overlay referencing &con comes first in the file order, so its
    // assignment loses to the later definition even though it links last.
    let rt = build(vec![
        ref_frag("con", 10, vec![prop("x", cells(&[1]))]),
        root(vec![
            cpus(),
            labeled_node("con", 20, "serial", vec![prop("x", cells(&[2]))]),
        ]),
    ]);

    let serial = child(&rt, "/serial");
    assert_eq!(rt.node(serial).references.len(), 1);

    let live = rt.node(serial).property("x").expect("x is live");
    assert_eq!(rt.property(live).first_word(), Some(2));
    let history = rt.all_replaced(live);
    assert_eq!(history.len(), 1);
    assert_eq!(rt.property(history[0]).first_word(), Some(1));
    assert!(of_kind(&rt, IssueKind::UnresolvedReference).is_empty());
}

#[test]
fn test_unresolved_label_reference_is_reported() {
    let rt = build(vec![
        root(vec![cpus()]),
        ref_frag("nowhere", 33, vec![prop("x", cells(&[1]))]),
    ]);

    let unresolved = of_kind(&rt, IssueKind::UnresolvedReference);
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].span, span(33));
    // The rest of the tree is still queryable.
    assert!(rt.get_child("/cpus", true).is_some());
}

#[test]
fn test_duplicate_label_reported_once() {
    let rt = build(vec![root(vec![
        cpus(),
        labeled_node("l", 10, "a", vec![]),
        labeled_node("l", 20, "b", vec![]),
    ])]);

    let dups = of_kind(&rt, IssueKind::LabelAlreadyInUse);
    assert_eq!(dups.len(), 1);
    assert_eq!(dups[0].span, span(20));
    assert_eq!(dups[0].related, vec![span(10)]);
}

#[test]
fn test_same_owner_label_redeclaration_is_silent() {
    let rt = build(vec![
        root(vec![cpus(), labeled_node("l", 10, "a", vec![])]),
        root(vec![labeled_node("l", 20, "a", vec![])]),
    ]);

    assert!(of_kind(&rt, IssueKind::LabelAlreadyInUse).is_empty());
    assert_eq!(rt.resolve_label("l"), rt.get_child("/a", false));
}

#[test]
fn test_label_moves_to_recreated_node() {
    let rt = build(vec![
        root(vec![cpus(), labeled_node("l", 10, "a", vec![])]),
        root(vec![delete_node("a"), labeled_node("l", 20, "a", vec![])]),
    ]);

    // The first owner is deleted; the label follows the live claimant
    // without a duplicate-label report.
    assert!(of_kind(&rt, IssueKind::LabelAlreadyInUse).is_empty());
    let owner = rt.resolve_label("l").expect("label resolves");
    assert!(rt.is_live(owner));
}

#[test]
fn test_missing_cpus_reported_once_at_last_definition() {
    let rt = build(vec![
        root_at(vec![node("dev", vec![])], 10),
        root_at(vec![], 20),
    ]);

    let missing = of_kind(&rt, IssueKind::MissingCpusNode);
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].span, span(20));
    assert_eq!(missing[0].related, vec![span(10)]);

    let ok = build(vec![root(vec![cpus()])]);
    assert!(of_kind(&ok, IssueKind::MissingCpusNode).is_empty());
}

#[test]
fn test_phandle_lookup_tolerates_duplicates() {
    let rt = build(vec![root(vec![
        cpus(),
        node("a", vec![prop("phandle", cells(&[1]))]),
        node("b", vec![prop("phandle", cells(&[1]))]),
        node("c", vec![prop("phandle", cells(&[2]))]),
    ])]);

    assert_eq!(rt.get_phandle(1), rt.get_child("/a", false));
    assert_eq!(rt.get_all_phandle(1).len(), 2);
    assert_eq!(rt.get_phandle(2), rt.get_child("/c", false));
    assert!(rt.get_phandle(9).is_none());
}

#[test]
fn test_get_child_strictness() {
    let rt = build(vec![root(vec![
        cpus(),
        prop("#address-cells", cells(&[1])),
        prop("#size-cells", cells(&[1])),
        node("u@1", vec![]),
        node("u@2", vec![]),
        node("v@1", vec![]),
    ])]);

    // Ambiguous bare name fails either way.
    assert!(rt.get_child("/u", true).is_none());
    assert!(rt.get_child("/u", false).is_none());
    // Exact unit address always works.
    assert!(rt.get_child("/u@1", true).is_some());
    // A single sibling is unambiguous even without its address.
    assert!(rt.get_child("/v", true).is_some());
    assert!(rt.get_child("/v", false).is_some());
}

#[test]
fn test_resolve_path_through_labels() {
    let rt = build(vec![root(vec![
        cpus(),
        labeled_node("soc", 10, "soc", vec![node("uart", vec![])]),
    ])]);

    assert_eq!(rt.resolve_path("&soc").as_deref(), Some("/soc"));
    assert_eq!(rt.resolve_path("&soc/uart").as_deref(), Some("/soc/uart"));
    assert!(rt.resolve_path("&missing").is_none());
    assert_eq!(
        rt.get_child("&soc/uart", false),
        rt.get_child("/soc/uart", false)
    );
}

#[test]
fn test_interrupt_map_match() {
    let rt = build(vec![root(vec![
        cpus(),
        labeled_node(
            "gic",
            10,
            "interrupt-controller",
            vec![
                prop("#interrupt-cells", cells(&[3])),
                prop("#address-cells", cells(&[0])),
            ],
        ),
        node(
            "nexus",
            vec![
                prop("#address-cells", cells(&[1])),
                prop("#interrupt-cells", cells(&[2])),
                prop(
                    "interrupt-map",
                    vec![
                        int(0),
                        int(0),
                        int(0),
                        Value::LabelRef(Label::new("gic", Span::dummy())),
                        int(0),
                        int(5),
                        int(4),
                    ],
                ),
            ],
        ),
    ])]);

    let nexus = child(&rt, "/nexus");
    let gic = child(&rt, "/interrupt-controller");

    let map = rt.nexus_map(nexus, "interrupt").expect("map parses");
    assert_eq!(map.child_cells, 3, "unit address keys the interrupt map");
    assert_eq!(map.entries.len(), 1);

    let entry = rt
        .nexus_map_entry_match(nexus, "interrupt", &[0], &[NexusWord::Num(0), NexusWord::Num(0)])
        .expect("row matches");
    assert_eq!(entry.target, gic);
    assert_eq!(
        entry.parent,
        vec![NexusWord::Num(0), NexusWord::Num(5), NexusWord::Num(4)]
    );

    // Without a mask every word must match exactly.
    assert!(
        rt.nexus_map_entry_match(nexus, "interrupt", &[0], &[NexusWord::Num(0), NexusWord::Num(1)])
            .is_none()
    );
    // A wrong-arity key is no match, not an error.
    assert!(
        rt.nexus_map_entry_match(nexus, "interrupt", &[], &[NexusWord::Num(0)])
            .is_none()
    );
}

#[test]
fn test_nexus_map_mask() {
    let rt = build(vec![root(vec![
        cpus(),
        labeled_node("ctrl", 10, "controller", vec![prop("#gpio-cells", cells(&[1]))]),
        node(
            "nexus",
            vec![
                prop("#gpio-cells", cells(&[2])),
                prop("gpio-map-mask", cells(&[0xf])),
                prop(
                    "gpio-map",
                    vec![
                        int(0x10),
                        int(7),
                        Value::LabelRef(Label::new("ctrl", Span::dummy())),
                        int(3),
                    ],
                ),
            ],
        ),
    ])]);

    let nexus = child(&rt, "/nexus");
    // 0x20 & 0xf == 0x10 & 0xf; the second word is unmasked (all-ones).
    let entry = rt
        .nexus_map_entry_match(nexus, "gpio", &[], &[NexusWord::Num(0x20), NexusWord::Num(7)])
        .expect("masked match");
    assert_eq!(entry.parent, vec![NexusWord::Num(3)]);
    assert!(
        rt.nexus_map_entry_match(nexus, "gpio", &[], &[NexusWord::Num(0x20), NexusWord::Num(8)])
            .is_none(),
        "unmasked words still compare exactly"
    );
}

#[test]
fn test_nexus_map_unresolvable_phandle_fails_parse() {
    let rt = build(vec![root(vec![
        cpus(),
        node(
            "nexus",
            vec![
                prop("#gpio-cells", cells(&[1])),
                prop(
                    "gpio-map",
                    vec![
                        int(0),
                        Value::LabelRef(Label::new("nowhere", Span::dummy())),
                        int(1),
                    ],
                ),
            ],
        ),
    ])]);

    let nexus = child(&rt, "/nexus");
    assert!(rt.nexus_map(nexus, "gpio").is_none());
    assert!(
        rt.nexus_map_entry_match(nexus, "gpio", &[], &[NexusWord::Num(0)])
            .is_none(),
        "no map means no match, never an error"
    );
}

#[test]
fn test_nexus_map_truncates_short_tail() {
    let rt = build(vec![root(vec![
        cpus(),
        labeled_node("ctrl", 10, "controller", vec![prop("#gpio-cells", cells(&[2]))]),
        node(
            "nexus",
            vec![
                prop("#gpio-cells", cells(&[1])),
                prop(
                    "gpio-map",
                    vec![
                        int(0),
                        Value::LabelRef(Label::new("ctrl", Span::dummy())),
                        int(1),
                        int(2),
                        // Second row runs out after the phandle.
                        int(1),
                        Value::LabelRef(Label::new("ctrl", Span::dummy())),
                        int(9),
                    ],
                ),
            ],
        ),
    ])]);

    let map = rt
        .nexus_map(child(&rt, "/nexus"), "gpio")
        .expect("map parses");
    assert_eq!(map.entries.len(), 1, "short tail truncates the table");
    assert_eq!(
        map.entries[0].parent,
        vec![NexusWord::Num(1), NexusWord::Num(2)]
    );
}

#[test]
fn test_unit_address_arity_mismatch() {
    let rt = build(vec![root(vec![
        cpus(),
        // Root defaults to #address-cells = 2; one word is a mismatch.
        node_at("dev@10", vec![], 42),
    ])]);

    let mismatches = of_kind(&rt, IssueKind::UnitAddressMismatch);
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].span, span(42));
}

#[test]
fn test_required_properties_from_bindings() {
    struct Catalog;

    impl BindingResolver for Catalog {
        fn node_type(&self, _name: &NodeName, compatible: &[String]) -> Option<NodeType> {
            compatible
                .iter()
                .any(|c| c == "test,clocked")
                .then(|| NodeType {
                    name: Some("clocked".to_owned()),
                    required: vec!["clocks".to_owned()],
                })
        }
    }

    let fragments = vec![root(vec![
        cpus(),
        node(
            "good",
            vec![
                prop("compatible", vec![string("test,clocked")]),
                prop("clocks", cells(&[1])),
            ],
        ),
        node(
            "bad",
            vec![prop("compatible", vec![string("test,clocked")])],
        ),
    ])];
    let rt = Runtime::build_with_bindings(fragments, Some(Arc::new(Catalog))).expect("build");

    let missing = of_kind(&rt, IssueKind::RequiredPropertyMissing);
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].args, vec!["clocks".to_owned(), "clocked".to_owned()]);
}

#[test]
fn test_plain_tree_projection() -> anyhow::Result<()> {
    use anyhow::Context as _;

    let rt = build(vec![root(vec![
        cpus(),
        prop("model", vec![string("demo-board")]),
        node(
            "chosen",
            vec![prop(
                "stdout-path",
                vec![Value::PathRef {
                    path: "/serial".to_owned(),
                    span: Span::dummy(),
                }],
            )],
        ),
    ])]);

    let plain = rt.to_plain();
    assert_eq!(plain.name, "/");
    assert_eq!(plain.children.len(), 2);
    assert_eq!(plain.properties.len(), 1);
    assert_eq!(plain.properties[0].name, "model");

    let chosen = plain
        .children
        .iter()
        .find(|c| c.name == "chosen")
        .context("chosen node serialized")?;
    assert_eq!(
        chosen.properties[0].values,
        vec![dt_model::PlainValue::Reference("&{/serial}".to_owned())]
    );
    Ok(())
}
