use bladesmith::{Document, FnVisitor, Pass, directive, rewrite};
use divan::{Bencher, black_box};

fn main() {
    divan::main();
}

fn template() -> String {
    let row = r#"
    @foreach($orders as $order)
        <tr class="row" :data-id="$order->id">
            <td>{{ $order->number }}</td>
            <td>{!! $order->notes !!}</td>
            <td>@money($order->total)</td>
            @if($order->late)<td class="warn">late</td>@endif
        </tr>
    @endforeach
"#;
    let mut out = String::from("<table>\n");
    for _ in 0..200 {
        out.push_str(row);
    }
    out.push_str("</table>\n");
    out
}

#[divan::bench]
fn parse(bencher: Bencher) {
    let source = template();
    bencher.bench_local(|| black_box(Document::parse(black_box(&source))));
}

#[divan::bench]
fn identity_pass(bencher: Bencher) {
    let doc = Document::parse(&template());
    bencher.bench_local(|| black_box(Pass::new().run(black_box(&doc))));
}

#[divan::bench]
fn observing_pass(bencher: Bencher) {
    let doc = Document::parse(&template());
    bencher.bench_local(|| {
        let mut elements = 0usize;
        let out = rewrite(
            &doc,
            FnVisitor::new().on_enter(|path| {
                elements += usize::from(path.is_element());
                Ok(())
            }),
        );
        black_box((out, elements))
    });
}

#[divan::bench]
fn editing_pass(bencher: Bencher) {
    let doc = Document::parse(&template());
    bencher.bench_local(|| {
        rewrite(
            &doc,
            FnVisitor::new().on_enter(|path| {
                if path.is_tag("tr") {
                    path.add_class("striped")?;
                } else if path.is_tag("td") && path.index_in_parent() == Some(0) {
                    path.prepend_child(directive("can").args("'view'"));
                } else if path.is_echo() {
                    path.wrap_in("<span>", "</span>");
                }
                Ok(())
            }),
        )
        .map(|out| black_box(out.render()))
    });
}
