mod support;

use fp_core::span::Span;
use fp_core::thir::{BinaryOp, Ty, Visibility};
use fp_stackgen::{generate, GeneratorOptions};
use pretty_assertions::assert_eq;

use support::builder::*;
use support::generate_errors;

fn messages(diagnostics: &[fp_core::Diagnostic]) -> Vec<&str> {
    diagnostics.iter().map(|d| d.message.as_str()).collect()
}

#[test]
fn unknown_identifier_points_at_its_statement() {
    let mut builder = ProgramBuilder::new();
    builder.external("print", vec![Ty::Int], Ty::Void);
    builder.entry(vec![at(3, print(ident("missing", Ty::Int)))]);

    let errors = generate_errors(&builder.build());
    assert_eq!(messages(&errors), vec!["unknown identifier `missing`"]);
    assert_eq!(errors[0].span, Some(Span::line(3)));
}

#[test]
fn return_outside_a_function() {
    let mut builder = ProgramBuilder::new();
    builder.statement(ret(Some(int(1))));

    let errors = generate_errors(&builder.build());
    assert_eq!(messages(&errors), vec!["`return` outside of a function"]);
}

#[test]
fn mismatched_initializer_type() {
    let mut builder = ProgramBuilder::new();
    builder.entry(vec![let_("x", Ty::Int, Some(boolean(true)))]);

    let errors = generate_errors(&builder.build());
    assert_eq!(messages(&errors), vec!["type mismatch: expected int, found bool"]);
}

#[test]
fn conditions_must_be_bool() {
    let mut builder = ProgramBuilder::new();
    builder.entry(vec![
        if_(int(1), Vec::new(), None),
        while_(binary(BinaryOp::Add, int(1), int(2)), Vec::new()),
    ]);

    let errors = generate_errors(&builder.build());
    assert_eq!(
        messages(&errors),
        vec!["condition must be bool, found int", "condition must be bool, found int"]
    );
}

#[test]
fn lowering_continues_after_a_failed_statement() {
    let mut builder = ProgramBuilder::new();
    builder.external("print", vec![Ty::Int], Ty::Void);
    builder.entry(vec![
        at(1, print(ident("a", Ty::Int))),
        at(2, let_("ok", Ty::Int, Some(int(1)))),
        at(3, print(ident("ok", Ty::Int))),
        at(4, break_()),
        at(5, print(ident("b", Ty::Int))),
    ]);

    let errors = generate_errors(&builder.build());
    assert_eq!(
        messages(&errors),
        vec![
            "unknown identifier `a`",
            "`break` outside of a loop",
            "unknown identifier `b`"
        ]
    );
    let lines: Vec<u32> = errors.iter().filter_map(|d| d.span).map(|s| s.line).collect();
    assert_eq!(lines, vec![1, 4, 5]);
}

#[test]
fn value_returned_from_void_function() {
    let mut builder = ProgramBuilder::new();
    builder.function("noop", Vec::new(), Ty::Void, vec![ret(Some(int(1)))]);

    let errors = generate_errors(&builder.build());
    assert_eq!(messages(&errors), vec!["function `noop` does not return a value"]);
}

#[test]
fn several_entry_functions_are_rejected() {
    let mut builder = ProgramBuilder::new();
    builder.entry(Vec::new());
    let second = builder.function("start", Vec::new(), Ty::Void, Vec::new());
    builder.function_mut(second).is_entry = true;

    let errors = generate_errors(&builder.build());
    assert_eq!(messages(&errors), vec!["multiple entry functions: main, start"]);
}

#[test]
fn unknown_externals_and_bad_casts() {
    let mut builder = ProgramBuilder::new();
    builder.entry(vec![
        eval(external_call("launch", Vec::new(), Ty::Void)),
        eval(cast(boolean(true), Ty::Int)),
    ]);

    let errors = generate_errors(&builder.build());
    assert_eq!(
        messages(&errors),
        vec!["unknown external function `launch`", "cannot cast bool to int"]
    );
}

#[test]
fn warnings_do_not_fail_generation() {
    let mut builder = ProgramBuilder::new();
    builder.function("spin", Vec::new(), Ty::Void, vec![while_(boolean(true), Vec::new())]);
    builder.function("answer", Vec::new(), Ty::Int, Vec::new());
    builder.entry(vec![eval(cast(int(3), Ty::Int))]);

    let report = generate(&builder.build(), &GeneratorOptions::default()).unwrap();
    assert!(report.value.is_some());
    let warnings: Vec<&str> = report.warnings().map(|d| d.message.as_str()).collect();
    assert_eq!(
        warnings,
        vec![
            "potential infinite loop: condition is always true and the body never breaks",
            "function `answer` never returns a value",
            "redundant cast to int",
        ]
    );
}

#[test]
fn private_destructors_cannot_be_reached_from_outside() {
    let tracked = |owned: bool| {
        let mut builder = ProgramBuilder::new();
        builder.external("print", vec![Ty::Int], Ty::Void);
        let (tracker_ty, destructor) = tracker_class(&mut builder);
        builder.function_mut(destructor).visibility = Visibility::Private;
        let value = Some(new(tracker_ty.clone(), vec![int(1)]));
        let body = if owned {
            vec![let_owned("t", tracker_ty, value)]
        } else {
            vec![let_("t", tracker_ty.clone(), value), delete(ident("t", tracker_ty))]
        };
        builder.entry(body);
        builder.build()
    };

    for owned in [false, true] {
        let errors = generate_errors(&tracked(owned));
        assert_eq!(messages(&errors), vec!["`destructor` is private to its type"]);
    }
}
