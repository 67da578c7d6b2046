//! Tests for rewrite passes.

use bladesmith::{
    Content, Document, FnVisitor, NodeKind, NodePath, Pass, Pipeline, RewriteError, Visitor,
    directive, element, rewrite,
};
use facet_testhelpers::test;

fn rewrite_with(source: &str, visitor: impl Visitor) -> String {
    rewrite(&Document::parse(source), visitor).unwrap().render()
}

#[test]
fn test_identity_without_visitors() {
    let source = "<div class=\"a\">\n  @if($x) {{ $y }} @endif\n</div>\n<br/>";
    let doc = Document::parse(source);
    let out = Pass::new().run(&doc).unwrap();
    assert_eq!(out.render(), source);
    // the input is untouched and can be reused
    assert_eq!(doc.render(), source);
}

#[test]
fn test_set_attribute_then_add_class() {
    let out = rewrite_with(
        "<div>old</div>",
        FnVisitor::new().on_enter(|path| {
            if path.is_tag("div") {
                path.set_attribute("class", "a")?;
                path.add_class("b")?;
            }
            Ok(())
        }),
    );
    assert_eq!(out, r#"<div class="a b">old</div>"#);
}

#[test]
fn test_remove_first_paragraph() {
    let mut removed = false;
    let out = rewrite_with(
        "<p>x</p><p>y</p>",
        FnVisitor::new().on_enter(|path| {
            if path.is_tag("p") && !removed {
                removed = true;
                path.remove();
            }
            Ok(())
        }),
    );
    assert_eq!(out, "<p>y</p>");
}

#[test]
fn test_removed_node_gets_no_leave() {
    let mut left = Vec::new();
    let out = rewrite_with(
        "<ul><li>a</li><li>b</li></ul>",
        FnVisitor::new()
            .on_enter(|path| {
                if path.text() == Some("<li>a</li>") {
                    path.remove();
                }
                Ok(())
            })
            .on_leave(|path| {
                if path.is_element() {
                    left.push(path.text().unwrap_or_default().to_string());
                }
                Ok(())
            }),
    );
    assert_eq!(out, "<ul><li>b</li></ul>");
    assert_eq!(left, vec!["<li>b</li>", "<ul><li>a</li><li>b</li></ul>"]);
}

#[test]
fn test_replace_skips_children() {
    let mut visited_inside = false;
    let out = rewrite_with(
        "<p>keep</p><aside><b>hidden</b></aside>",
        FnVisitor::new().on_enter(|path| {
            if path.is_tag("aside") {
                path.replace_with(element("nav").child("menu"));
            }
            if path.is_tag("b") {
                visited_inside = true;
            }
            Ok(())
        }),
    );
    assert_eq!(out, "<p>keep</p><nav>menu</nav>");
    assert!(!visited_inside);
}

#[test]
fn test_set_attribute_twice_yields_one() {
    let out = rewrite_with(
        r#"<span x="0">s</span>"#,
        FnVisitor::new().on_enter(|path| {
            if path.is_tag("span") {
                path.set_attribute("x", "a")?.set_attribute("X", "b")?;
            }
            Ok(())
        }),
    );
    assert_eq!(out, r#"<span x="b">s</span>"#);
}

#[test]
fn test_class_toggle_round_trip() {
    let out = rewrite_with(
        r#"<i class="icon">*</i><b class="k">!</b>"#,
        FnVisitor::new().on_enter(|path| {
            if path.is_tag("i") {
                path.add_class("k")?.add_class("k")?;
                assert_eq!(path.get_classes()?, vec!["icon", "k"]);
                path.remove_class("k")?;
                assert!(!path.has_class("k")?);
            }
            if path.is_tag("b") {
                path.toggle_class("k")?;
                assert!(!path.has_attribute("class")?);
            }
            Ok(())
        }),
    );
    assert_eq!(out, r#"<i class="icon">*</i><b>!</b>"#);
}

#[test]
fn test_safe_surround_keeps_single_root() {
    let doc = Document::parse("<main><p>x</p></main>\n");
    let out = rewrite(
        &doc,
        FnVisitor::new().on_enter(|path| {
            if path.is_tag("main") {
                path.safe_surround(directive("auth"), Some(directive("endauth").into()));
            }
            Ok(())
        }),
    )
    .unwrap();
    assert_eq!(out.render(), "<main>@auth<p>x</p>@endauth</main>\n");
    assert_eq!(out.root_elements().count(), 1);

    let doc = Document::parse("<p>a</p><p>b</p>");
    let out = rewrite(
        &doc,
        FnVisitor::new().on_enter(|path| {
            if path.index_in_parent().is_none() && path.is_element() {
                path.safe_surround("[", None);
            }
            Ok(())
        }),
    )
    .unwrap();
    assert_eq!(out.render(), "[<p>a</p>[<p>b</p>");
}

#[test]
fn test_wrap_then_unwrap_in_later_pass() {
    let source = "<p>one</p> <p>two</p>";
    let doc = Document::parse(source);
    let mut pipeline = Pipeline::new()
        .pass(Pass::new().with(FnVisitor::new().on_enter(|path| {
            if path.is_tag("p") {
                path.wrap_with(element("div").attr("class", "w"));
            }
            Ok(())
        })))
        .pass(Pass::new().with(FnVisitor::new().on_enter(|path| {
            if path.is_tag("div") {
                path.unwrap();
            }
            Ok(())
        })));

    let wrapped = Pass::new()
        .with(FnVisitor::new().on_enter(|path| {
            if path.is_tag("p") {
                path.wrap_with(element("div").attr("class", "w"));
            }
            Ok(())
        }))
        .run(&doc)
        .unwrap();
    assert_eq!(
        wrapped.render(),
        r#"<div class="w"><p>one</p></div> <div class="w"><p>two</p></div>"#
    );
    assert_eq!(pipeline.run(&doc).unwrap().render(), source);
}

#[test]
fn test_insert_after_from_enter_and_leave() {
    struct Early;
    struct Late;

    impl Visitor for Early {
        fn enter(&mut self, path: &mut NodePath<'_>) -> Result<(), RewriteError> {
            if path.is_tag("hr") {
                path.insert_after("1");
            }
            Ok(())
        }
    }

    impl Visitor for Late {
        fn leave(&mut self, path: &mut NodePath<'_>) -> Result<(), RewriteError> {
            if path.is_tag("hr") {
                path.insert_after("2");
            }
            Ok(())
        }
    }

    let doc = Document::parse("<hr>|");
    let out = Pass::new().with(Early).with(Late).run(&doc).unwrap();
    assert_eq!(out.render(), "<hr>12|");
}

#[test]
fn test_insert_before_in_leave_is_ignored() {
    let out = rewrite_with(
        "<hr>",
        FnVisitor::new().on_leave(|path| {
            path.insert_before("x");
            Ok(())
        }),
    );
    assert_eq!(out, "<hr>");
}

#[test]
fn test_surround_with() {
    let out = rewrite_with(
        "a {{ $old }} b",
        FnVisitor::new().on_enter(|path| {
            if path.is_echo() {
                path.surround_with("<b>", bladesmith::echo("$new"), "</b>");
            }
            Ok(())
        }),
    );
    assert_eq!(out, "a <b>{{ $new }}</b> b");
}

#[test]
fn test_directive_gets_leading_separator() {
    let out = rewrite_with(
        "<p>Total</p>",
        FnVisitor::new().on_enter(|path| {
            if path.is_tag("p") {
                path.append_child(directive("money").args("$total"));
            }
            Ok(())
        }),
    );
    assert_eq!(out, "<p>Total @money($total)</p>");
}

#[test]
fn test_stop_keeps_partial_output() {
    let out = rewrite_with(
        "<ol><li>1</li><li>2</li><li>3</li></ol><p>after</p>",
        FnVisitor::new().on_enter(|path| {
            if path.text() == Some("<li>2</li>") {
                path.stop();
            }
            Ok(())
        }),
    );
    assert_eq!(out, "<ol><li>1</li>");
}

#[test]
fn test_errors_propagate_from_visitors() {
    let doc = Document::parse("text only");
    let err = rewrite(
        &doc,
        FnVisitor::new().on_enter(|path| {
            path.add_class("x")?;
            Ok(())
        }),
    )
    .unwrap_err();
    assert!(matches!(err, RewriteError::NotAnElement { .. }));
    assert_eq!(err.to_string(), "add_class requires an element node, found Text");
}

#[test]
fn test_second_pass_edits_synthetic_element() {
    let doc = Document::parse("<p>x</p>");
    let mut pipeline = Pipeline::new()
        .pass(Pass::new().with(FnVisitor::new().on_enter(|path| {
            if path.is_tag("p") {
                path.rename_tag("section")?.set_attribute("id", "s")?;
            }
            Ok(())
        })))
        .pass(Pass::new().with(FnVisitor::new().on_enter(|path| {
            if path.is_tag("section") {
                assert_eq!(path.get_attribute("id")?.as_deref(), Some("s"));
                path.set_attribute("id", "t")?.add_class("c")?;
            }
            Ok(())
        })));
    let out = pipeline.run(&doc).unwrap();
    assert_eq!(out.render(), r#"<section id="t" class="c">x</section>"#);
    let section = out.root_elements().next().unwrap();
    assert_eq!(out.kind(section), NodeKind::Element);
    assert_eq!(out.element(section).unwrap().attribute("class"), Some("c"));
}

#[test]
fn test_passes_share_input_across_threads() {
    let doc = Document::parse("<p>a</p><p>b</p>");
    let renders: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = ["x", "y", "z"]
            .into_iter()
            .map(|class| {
                let doc = &doc;
                scope.spawn(move || {
                    rewrite(
                        doc,
                        FnVisitor::new().on_enter(move |path| {
                            if path.is_tag("p") {
                                path.add_class(class)?;
                            }
                            Ok(())
                        }),
                    )
                    .unwrap()
                    .render()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(renders[0], r#"<p class="x">a</p><p class="x">b</p>"#);
    assert_eq!(renders[2], r#"<p class="z">a</p><p class="z">b</p>"#);
    assert_eq!(doc.render(), "<p>a</p><p>b</p>");
}

#[test]
fn test_replace_with_many_in_block() {
    let out = rewrite_with(
        "@foreach($xs as $x)<i>{{ $x }}</i>@endforeach",
        FnVisitor::new().on_enter(|path| {
            if path.is_tag("i") {
                path.replace_with_many([
                    Content::from("<b>"),
                    bladesmith::echo("$x").into(),
                    "</b>".into(),
                ]);
            }
            Ok(())
        }),
    );
    assert_eq!(out, "@foreach($xs as $x)<b>{{ $x }}</b>@endforeach");
}
