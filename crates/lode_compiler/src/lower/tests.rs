use crate::{compile_program, CompileOptions, ErrorKind, Stage};
use lode_codegen_wasm::{Instr, RelOp, ValType};
use lode_syntax::ast::{
    Assertion, BinaryOp, BlockStmt, EnumConstructor, EnumOption, EnumTypeDefn, EnumValue,
    FuncDecl, IfStmt, Item, MatchCase, MatchStmt, Program, Stmt, Type, TypeDefn, Value,
    VarWithType, WhileLoop,
};
use lode_syntax::hlir::{self, ArithOp, CompareOp, Opcode};
use lode_syntax::mlir::{self, JumpCond};
use lode_syntax::{Register, TypeInformation};
use std::collections::BTreeSet;

fn program(decls: Vec<FuncDecl>) -> Program {
    Program {
        items: decls.into_iter().map(Item::Func).collect(),
    }
}

fn main_fn(stmts: Vec<Stmt>) -> FuncDecl {
    FuncDecl::new("main", vec![], vec![], stmts)
}

fn var(name: &str, typ: Type) -> VarWithType {
    VarWithType::new(name, typ)
}

fn int(name: &str) -> VarWithType {
    var(name, Type::Int)
}

fn compile(decls: Vec<FuncDecl>) -> crate::CompiledModule {
    compile_program(
        &program(decls),
        &TypeInformation::default(),
        &CompileOptions::all(),
    )
    .unwrap()
}

fn hlir_body(decls: Vec<FuncDecl>, name: &str) -> Vec<Opcode> {
    compile(decls)
        .hlir
        .into_iter()
        .find(|f| f.name == name)
        .unwrap()
        .body
}

fn mlir_of(decls: Vec<FuncDecl>, name: &str) -> mlir::Func {
    compile(decls)
        .mlir
        .into_iter()
        .find(|f| f.name == name)
        .unwrap()
}

fn call(name: &str, args: Vec<Register>, tail: bool) -> Opcode {
    Opcode::Call {
        name: name.to_string(),
        args,
        tail,
    }
}

fn if_stmt(condition: Value, body: Vec<Stmt>, else_: Option<Vec<Stmt>>) -> Stmt {
    Stmt::If(IfStmt {
        condition,
        body: body.into(),
        else_: else_.map(BlockStmt::from),
    })
}

fn while_stmt(condition: Value, body: Vec<Stmt>) -> Stmt {
    Stmt::While(WhileLoop {
        condition,
        body: body.into(),
    })
}

fn option_type() -> EnumTypeDefn {
    EnumTypeDefn {
        name: "Option".to_string(),
        options: vec![
            EnumOption {
                constructor: "None".to_string(),
                params: vec![],
            },
            EnumOption {
                constructor: "Some".to_string(),
                params: vec![Type::Int],
            },
        ],
    }
}

fn some(v: i64) -> Value {
    Value::EnumValue(EnumValue {
        constructor: "Some".to_string(),
        params: vec![Value::int(v)],
        typ: option_type(),
    })
}

fn none() -> Value {
    Value::EnumOption(EnumConstructor {
        constructor: "None".to_string(),
        typ: option_type(),
    })
}

/// `let o = Some(3); match o { case Some(v): PrintInt(v) case None: PrintInt(0) }`
fn option_match(after: Vec<Stmt>) -> FuncDecl {
    let o = var("o", Type::Enum(option_type()));
    let mut stmts = vec![
        Stmt::let_(o.clone(), some(3)),
        Stmt::Match(MatchStmt {
            condition: Some(Value::Var(o)),
            cases: vec![
                MatchCase {
                    variable: Value::EnumOption(EnumConstructor {
                        constructor: "Some".to_string(),
                        typ: option_type(),
                    }),
                    locals: vec![int("v")],
                    body: vec![Stmt::call("PrintInt", vec![Value::Var(int("v"))])].into(),
                },
                MatchCase {
                    variable: none(),
                    locals: vec![],
                    body: vec![Stmt::call("PrintInt", vec![Value::int(0)])].into(),
                },
            ],
        }),
    ];
    stmts.extend(after);
    main_fn(stmts)
}

/// `mut terminate = false; while terminate != true { terminate = true }`
fn terminate_loop() -> FuncDecl {
    let terminate = var("terminate", Type::Bool);
    main_fn(vec![
        Stmt::mut_(terminate.clone(), Value::BoolLit(false)),
        while_stmt(
            Value::binary(
                BinaryOp::Neq,
                Value::Var(terminate.clone()),
                Value::BoolLit(true),
            ),
            vec![Stmt::assign(Value::Var(terminate), Value::BoolLit(true))],
        ),
    ])
}

/// Sums 10 down to 1.
fn sum_to_ten() -> FuncDecl {
    let sum = int("sum");
    let val = int("val");
    main_fn(vec![
        Stmt::mut_(sum.clone(), Value::int(0)),
        Stmt::mut_(val.clone(), Value::int(10)),
        while_stmt(
            Value::binary(BinaryOp::Gt, Value::Var(val.clone()), Value::int(0)),
            vec![
                Stmt::assign(
                    Value::Var(sum.clone()),
                    Value::binary(BinaryOp::Add, Value::Var(sum.clone()), Value::Var(val.clone())),
                ),
                Stmt::assign(
                    Value::Var(val.clone()),
                    Value::binary(BinaryOp::Sub, Value::Var(val), Value::int(1)),
                ),
            ],
        ),
        Stmt::call("PrintInt", vec![Value::Var(sum)]),
    ])
}

fn count_bytes() -> FuncDecl {
    let s = var("s", Type::slice(Type::Byte));
    FuncDecl::new(
        "count",
        vec![s.clone()],
        vec![int("n")],
        vec![Stmt::ret(Some(Value::call("len", vec![Value::Var(s)])))],
    )
}

#[test]
fn hello_world_is_a_single_call() {
    let body = hlir_body(
        vec![main_fn(vec![Stmt::call(
            "PrintString",
            vec![Value::string("Hello, world!\\n")],
        )])],
        "main",
    );
    assert_eq!(
        body,
        vec![call(
            "PrintString",
            vec![Register::StrLit("Hello, world!\\n".to_string())],
            false
        )]
    );
}

#[test]
fn shadowed_let_gets_a_fresh_local() {
    let body = hlir_body(
        vec![main_fn(vec![
            Stmt::let_(int("n"), Value::int(5)),
            Stmt::call("PrintInt", vec![Value::Var(int("n"))]),
            Stmt::call("PrintString", vec![Value::string("\\n")]),
            Stmt::let_(var("n", Type::Str), Value::string("hello")),
            Stmt::call("PrintString", vec![Value::Var(var("n", Type::Str))]),
        ])],
        "main",
    );
    assert_eq!(
        body,
        vec![
            Opcode::mov(Register::IntLit(5), Register::Local(0)),
            call("PrintInt", vec![Register::Local(0)], false),
            call("PrintString", vec![Register::StrLit("\\n".to_string())], false),
            Opcode::mov(Register::StrLit("hello".to_string()), Register::Local(1)),
            call("PrintString", vec![Register::Local(1)], false),
        ]
    );
}

#[test]
fn returned_call_is_a_tail_call() {
    let x = int("x");
    let sum = FuncDecl::new(
        "sum",
        vec![x.clone()],
        vec![int("")],
        vec![Stmt::ret(Some(Value::call(
            "partial_sum",
            vec![Value::int(0), Value::Var(x)],
        )))],
    );
    let partial_sum = FuncDecl::new(
        "partial_sum",
        vec![int("acc"), int("x")],
        vec![int("")],
        vec![Stmt::ret(Some(Value::Var(int("acc"))))],
    );
    let body = hlir_body(vec![sum, partial_sum], "sum");
    assert_eq!(
        body,
        vec![
            call(
                "partial_sum",
                vec![Register::IntLit(0), Register::param(0)],
                true
            ),
            Opcode::Ret,
        ]
    );
}

#[test]
fn array_index_is_an_offset_scaled_by_element_size() {
    let n = var("n", Type::array(Type::Int, 5));
    let decls = vec![main_fn(vec![
        Stmt::let_(
            n.clone(),
            Value::array(Type::Int, (1..=5).map(Value::int).collect()),
        ),
        Stmt::call("PrintInt", vec![Value::index(n.clone(), Value::int(3))]),
    ])];
    let body = hlir_body(decls.clone(), "main");
    let mut expected: Vec<Opcode> = (0..5)
        .map(|i| Opcode::mov(Register::IntLit(i as i64 + 1), Register::Local(i)))
        .collect();
    expected.push(call(
        "PrintInt",
        vec![Register::offset(Register::Local(0), Register::IntLit(3), 8, n)],
        false,
    ));
    assert_eq!(body, expected);

    let mlir = mlir_of(decls, "main");
    assert_eq!(mlir.body[5].to_string(), "  CALL PrintInt([LV0 + 3*8])");
}

#[test]
fn accumulator_loop() {
    let body = hlir_body(vec![sum_to_ten()], "main");
    let loops: Vec<_> = body
        .iter()
        .filter_map(|op| match op {
            Opcode::Loop { cond, body, .. } => Some((cond, body)),
            _ => None,
        })
        .collect();
    assert_eq!(loops.len(), 1);
    let (cond, body) = loops[0];
    assert!(matches!(cond.register, Register::Temp(_)));
    let shape: Vec<_> = body
        .iter()
        .map(|op| match op {
            Opcode::Arith { op, .. } => Some(*op),
            _ => None,
        })
        .collect();
    assert_eq!(shape, vec![Some(ArithOp::Add), None, Some(ArithOp::Sub), None]);
    assert_eq!(body[1], Opcode::mov(Register::Temp(1), Register::Local(0)));
    assert_eq!(body[3], Opcode::mov(Register::Temp(2), Register::Local(1)));
}

#[test]
fn loop_lowers_to_block_loop_and_conditional_break() {
    let module = compile(vec![terminate_loop()]);
    let wasm = module.wasm.unwrap();
    let main = wasm.func("main").unwrap();
    let expected = [
        Instr::Block,
        Instr::Loop,
        Instr::LocalGet(0),
        Instr::I32Const(1),
        Instr::Rel(ValType::I32, RelOp::Ne),
        Instr::I32Eqz,
        Instr::BrIf(1),
    ];
    assert!(main.body.windows(expected.len()).any(|w| w == expected));
    let bytes = wasm.encode().unwrap();
    wasmparser::Validator::new().validate_all(&bytes).unwrap();
}

fn mixed_program() -> Vec<FuncDecl> {
    let x = int("x");
    vec![
        count_bytes(),
        option_match(vec![]),
        FuncDecl::new(
            "branches",
            vec![x.clone()],
            vec![int("")],
            vec![
                while_stmt(
                    Value::binary(BinaryOp::Lt, Value::Var(x.clone()), Value::int(10)),
                    vec![if_stmt(
                        Value::binary(
                            BinaryOp::Eq,
                            Value::binary(BinaryOp::Mod, Value::Var(x.clone()), Value::int(2)),
                            Value::int(0),
                        ),
                        vec![Stmt::call("PrintString", vec![Value::string("even\\n")])],
                        Some(vec![Stmt::call("PrintInt", vec![Value::Var(x.clone())])]),
                    )],
                ),
                Stmt::Assert(Assertion {
                    predicate: Value::binary(BinaryOp::Geq, Value::Var(x.clone()), Value::int(0)),
                    message: Some("negative".to_string()),
                    span: Default::default(),
                }),
                Stmt::ret(Some(Value::binary(BinaryOp::Mul, Value::Var(x), Value::int(3)))),
            ],
        ),
        terminate_loop(),
    ]
}

#[test]
fn emission_is_deterministic() {
    let first = compile(mixed_program());
    let second = compile(mixed_program());
    assert_eq!(first.hlir_text(), second.hlir_text());
    assert_eq!(first.mlir_text(), second.mlir_text());
    let (a, b) = (first.wasm.unwrap(), second.wasm.unwrap());
    assert_eq!(a.to_wat(), b.to_wat());
    assert_eq!(a.encode().unwrap(), b.encode().unwrap());
}

#[test]
fn mixed_program_validates() {
    let wasm = compile(mixed_program()).wasm.unwrap();
    let bytes = wasm.encode().unwrap();
    wasmparser::Validator::new()
        .validate_all(&bytes)
        .unwrap_or_else(|e| panic!("{}\n{}", e, wasm.to_wat()));
}

#[test]
fn labels_are_unique_within_a_function() {
    for f in compile(mixed_program()).mlir {
        let labels: Vec<&str> = f.labels().collect();
        let unique: BTreeSet<&str> = labels.iter().copied().collect();
        assert_eq!(labels.len(), unique.len(), "duplicate label in {}", f.name);
    }
}

#[test]
fn locals_and_temps_are_dense() {
    for f in compile(mixed_program()).hlir {
        for i in 0..f.num_locals {
            assert!(f.registers.contains_key(&Register::Local(i)), "{} LV{}", f.name, i);
        }
        for i in 0..f.num_temps {
            assert!(f.registers.contains_key(&Register::Temp(i)), "{} TV{}", f.name, i);
        }
    }
}

#[test]
fn call_results_are_numbered_in_order() {
    let one = FuncDecl::new("one", vec![], vec![int("")], vec![Stmt::ret(Some(Value::int(1)))]);
    let body = hlir_body(
        vec![
            one,
            main_fn(vec![
                Stmt::let_(int("a"), Value::call("one", vec![])),
                Stmt::let_(int("b"), Value::call("one", vec![])),
                Stmt::call(
                    "PrintInt",
                    vec![Value::binary(
                        BinaryOp::Add,
                        Value::Var(int("a")),
                        Value::call("one", vec![]),
                    )],
                ),
            ]),
        ],
        "main",
    );
    let reads: Vec<u32> = body
        .iter()
        .flat_map(|op| match op {
            Opcode::Mov { src, .. } => vec![src.clone()],
            Opcode::Arith { left, right, .. } => vec![left.clone(), right.clone()],
            _ => vec![],
        })
        .filter_map(|r| match r {
            Register::LastCallRet { call, .. } => Some(call),
            _ => None,
        })
        .collect();
    assert_eq!(reads, vec![0, 1, 2]);
}

#[test]
fn slices_cross_calls_as_length_and_pointer() {
    let b = var("b", Type::slice(Type::Byte));
    let module = compile(vec![
        count_bytes(),
        main_fn(vec![
            Stmt::let_(
                b.clone(),
                Value::array(Type::Byte, (1..=3).map(Value::int).collect()),
            ),
            Stmt::call("PrintInt", vec![Value::call("count", vec![Value::Var(b)])]),
        ]),
    ]);
    let count = module.hlir.iter().find(|f| f.name == "count").unwrap();
    assert_eq!(count.num_params, 2);
    assert_eq!(
        count.body[0],
        call("len", vec![Register::param(0), Register::param(1)], true)
    );

    let main = module.hlir.iter().find(|f| f.name == "main").unwrap();
    let first = main
        .body
        .iter()
        .find_map(|op| match op {
            Opcode::Call { name, args, .. } if name == "count" => Some(args.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        first,
        vec![Register::Local(0), Register::pointer(Register::Local(1))]
    );
    assert_eq!(main.registers[&Register::Local(0)].slice_capacity, Some(3));

    let wasm = module.wasm.unwrap();
    let bytes = wasm.encode().unwrap();
    wasmparser::Validator::new().validate_all(&bytes).unwrap();
}

#[test]
fn shadow_inside_loop_is_seeded_once() {
    let x = int("x");
    let body = hlir_body(
        vec![main_fn(vec![
            Stmt::let_(x.clone(), Value::int(1)),
            while_stmt(
                Value::binary(BinaryOp::Lt, Value::Var(x.clone()), Value::int(5)),
                vec![
                    Stmt::let_(
                        x.clone(),
                        Value::binary(BinaryOp::Add, Value::Var(x.clone()), Value::int(1)),
                    ),
                    Stmt::call("PrintInt", vec![Value::Var(x)]),
                ],
            ),
        ])],
        "main",
    );
    let Opcode::Loop {
        initializer, body, ..
    } = &body[1]
    else {
        panic!("expected a loop, got {}", body[1]);
    };
    assert_eq!(
        initializer,
        &vec![Opcode::mov(Register::Local(0), Register::Local(1))]
    );
    assert_eq!(
        body[0],
        Opcode::Arith {
            op: ArithOp::Add,
            left: Register::Local(1),
            right: Register::IntLit(1),
            dst: Register::Temp(1),
        }
    );
    assert_eq!(body[1], Opcode::mov(Register::Temp(1), Register::Local(1)));
    assert_eq!(body[2], call("PrintInt", vec![Register::Local(1)], false));
}

#[test]
fn payload_bindings_end_with_their_arm() {
    let body = hlir_body(vec![option_match(vec![])], "main");
    let Some(Opcode::JumpTable(cases)) = body.last() else {
        panic!("expected a jump table");
    };
    assert_eq!(cases.len(), 2);
    assert_eq!(
        cases[0].condition.body,
        vec![Opcode::Compare {
            op: CompareOp::Eq,
            left: Register::Local(0),
            right: Register::IntLit(1),
            dst: cases[0].condition.register.clone(),
        }]
    );
    assert_eq!(cases[0].body, vec![call("PrintInt", vec![Register::Local(1)], false)]);

    let err = compile_program(
        &program(vec![option_match(vec![Stmt::call(
            "PrintInt",
            vec![Value::Var(int("v"))],
        )])]),
        &TypeInformation::default(),
        &CompileOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedVariable("v".to_string()));
}

#[test]
fn enum_tables_are_module_global() {
    let module = compile_program(
        &Program {
            items: vec![
                Item::TypeDefn(TypeDefn {
                    name: "Option".to_string(),
                    typ: Type::Enum(option_type()),
                }),
                Item::Func(option_match(vec![])),
            ],
        },
        &TypeInformation::default(),
        &CompileOptions::default(),
    )
    .unwrap();
    assert_eq!(module.enums.get("None"), Some(0));
    assert_eq!(module.enums.get("Some"), Some(1));
}

#[test]
fn undefined_functions_fail_in_hlir() {
    let err = compile_program(
        &program(vec![main_fn(vec![Stmt::call("Nope", vec![])])]),
        &TypeInformation::default(),
        &CompileOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.function, "main");
    assert_eq!(err.stage, Stage::Hlir);
    assert_eq!(err.kind, ErrorKind::UndefinedFunction("Nope".to_string()));
}

#[test]
fn multiple_dispatch_is_rejected() {
    let f = |arg: Type| FuncDecl::new("f", vec![var("a", arg)], vec![], vec![]);
    let err = compile_program(
        &program(vec![
            f(Type::Int),
            f(Type::Bool),
            main_fn(vec![Stmt::call("f", vec![Value::int(1)])]),
        ]),
        &TypeInformation::default(),
        &CompileOptions::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::AmbiguousCall {
            name: "f".to_string(),
            count: 2
        }
    );
}

#[test]
fn if_conditions_must_be_boolean() {
    let err = compile_program(
        &program(vec![main_fn(vec![if_stmt(Value::int(5), vec![], None)])]),
        &TypeInformation::default(),
        &CompileOptions::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::NonBooleanCondition("integer literal".to_string())
    );
}

#[test]
fn multi_word_index_is_an_arity_error() {
    let n = var("n", Type::array(Type::Int, 2));
    let err = compile_program(
        &program(vec![main_fn(vec![
            Stmt::let_(n.clone(), Value::array(Type::Int, vec![Value::int(1), Value::int(2)])),
            Stmt::call(
                "PrintInt",
                vec![Value::index(n, Value::array(Type::Int, vec![Value::int(0), Value::int(1)]))],
            ),
        ])]),
        &TypeInformation::default(),
        &CompileOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::arity("index", 1, 2));
}

#[test]
fn if_else_flattens_to_labels() {
    let x = int("x");
    let f = mlir_of(
        vec![main_fn(vec![
            Stmt::let_(x.clone(), Value::int(3)),
            if_stmt(
                Value::binary(BinaryOp::Lt, Value::Var(x.clone()), Value::int(5)),
                vec![Stmt::call("PrintInt", vec![Value::int(1)])],
                Some(vec![Stmt::call("PrintInt", vec![Value::int(2)])]),
            ),
        ])],
        "main",
    );
    let text: Vec<String> = f.body.iter().map(|op| op.to_string()).collect();
    assert_eq!(
        text,
        vec![
            "  MOV 3, LV0",
            "  JGE LV0, 5, if0else",
            "  CALL PrintInt(1)",
            "  JMP if0elsedone",
            "if0else:",
            "  CALL PrintInt(2)",
            "if0elsedone:",
        ]
    );
}

#[test]
fn not_equal_loop_exits_on_equality() {
    let f = mlir_of(vec![terminate_loop()], "main");
    assert_eq!(f.body[1], mlir::Opcode::Label("loop0cond".to_string()));
    assert_eq!(
        f.body[2],
        mlir::Opcode::Jump {
            cond: JumpCond::Je,
            label: "loop0end".to_string(),
            left: Register::Local(0),
            right: Register::IntLit(1),
        }
    );
    assert_eq!(f.body.last(), Some(&mlir::Opcode::Label("loop0end".to_string())));
    assert_eq!(f.body[f.body.len() - 2], mlir::Opcode::Jmp("loop0cond".to_string()));
}

#[test]
fn match_jumps_on_success_then_falls_through() {
    let f = mlir_of(vec![option_match(vec![])], "main");
    let text: Vec<String> = f.body.iter().map(|op| op.to_string()).collect();
    let at = text.iter().position(|l| l.contains("match0v0")).unwrap();
    assert_eq!(text[at], "  JE LV0, 1, match0v0");
    assert_eq!(text[at + 1], "  JE LV0, 0, match0v1");
    assert_eq!(text[at + 2], "  JMP match0done");
    assert_eq!(text[at + 3], "match0v0:");
    assert_eq!(text.last().unwrap(), "match0done:");
}

#[test]
fn additive_arithmetic_is_two_address() {
    let f = mlir_of(vec![sum_to_ten()], "main");
    let text: Vec<String> = f.body.iter().map(|op| op.to_string()).collect();
    let at = text.iter().position(|l| l == "  MOV LV0, TV1").unwrap();
    assert_eq!(text[at + 1], "  ADD LV1, TV1");
    assert_eq!(text[at + 2], "  MOV TV1, LV0");
}

#[test]
fn boolean_lets_materialize_comparisons() {
    let f = mlir_of(
        vec![main_fn(vec![Stmt::let_(
            var("b", Type::Bool),
            Value::binary(BinaryOp::Lt, Value::int(1), Value::int(2)),
        )])],
        "main",
    );
    let text: Vec<String> = f.body.iter().map(|op| op.to_string()).collect();
    assert_eq!(
        text,
        vec![
            "  MOV 1, TV0",
            "  JL 1, 2, cmp0done",
            "  MOV 0, TV0",
            "cmp0done:",
            "  MOV TV0, LV0",
        ]
    );
}

#[test]
fn assertions_jump_over_the_failure() {
    let f = mlir_of(
        vec![main_fn(vec![Stmt::Assert(Assertion {
            predicate: Value::BoolLit(true),
            message: None,
            span: Default::default(),
        })])],
        "main",
    );
    let text: Vec<String> = f.body.iter().map(|op| op.to_string()).collect();
    assert_eq!(
        text,
        vec!["  JNE 1, 0, assert0ok", "  ASSERT 0, \"\"", "assert0ok:"]
    );
}

#[test]
fn largest_call_counts_arguments_and_result_words() {
    let f = mlir_of(
        vec![
            count_bytes(),
            main_fn(vec![
                Stmt::call("PrintInt", vec![Value::int(1)]),
                Stmt::call(
                    "PrintInt",
                    vec![Value::call("count", vec![Value::string("abc")])],
                ),
            ]),
        ],
        "main",
    );
    assert_eq!(f.largest_func_call, 3);
}

#[test]
fn hlir_dump_nests_bodies() {
    let module = compile(vec![terminate_loop()]);
    let text = module.hlir_text();
    assert!(text.starts_with("func main (params 0, returns 0, locals 1, temps 1):\n"));
    assert!(text.contains("  LOOP\n"));
    assert!(text.contains("NEQ LV0, 1, TV0"));
    let _: &hlir::Func = &module.hlir[0];
}

fn validates(module: crate::CompiledModule) -> crate::CompiledModule {
    let wasm = module.wasm.as_ref().unwrap();
    let bytes = wasm.encode().unwrap();
    wasmparser::Validator::new()
        .validate_all(&bytes)
        .unwrap_or_else(|e| panic!("{}\n{}", e, wasm.to_wat()));
    module
}

fn pick(index: Value) -> FuncDecl {
    let a = var("a", Type::array(Type::Int, 3));
    FuncDecl::new(
        "pick",
        vec![a.clone(), int("k")],
        vec![int("")],
        vec![Stmt::ret(Some(Value::index(a, index)))],
    )
}

#[test]
fn constant_index_into_an_array_param_reads_that_param() {
    let body = hlir_body(vec![pick(Value::int(1))], "pick");
    assert_eq!(
        body,
        vec![Opcode::mov(Register::param(1), Register::RetSlot(0)), Opcode::Ret]
    );
}

#[test]
fn constant_index_past_an_array_param_is_rejected() {
    let err = compile_program(
        &program(vec![pick(Value::int(3))]),
        &TypeInformation::default(),
        &CompileOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.function, "pick");
    assert_eq!(
        err.kind,
        ErrorKind::Unsupported("index 3 out of bounds for `a`".to_string())
    );
}

#[test]
fn variable_index_into_an_array_param_reads_the_frame_copy() {
    let module = validates(compile(vec![pick(Value::Var(int("k")))]));
    let wasm = module.wasm.unwrap();
    let f = wasm.func("pick").unwrap();
    // Three element params plus k; the frame holds copies of the elements.
    let copies = f
        .body
        .iter()
        .filter(|i| matches!(i, Instr::Store { .. }))
        .count();
    assert_eq!(copies, 3);
}

#[test]
fn by_value_params_can_be_passed_by_reference() {
    let x = VarWithType::reference("x", Type::Int);
    let inc = FuncDecl::new(
        "inc",
        vec![x.clone()],
        vec![],
        vec![Stmt::assign(
            Value::Var(x.clone()),
            Value::binary(BinaryOp::Add, Value::Var(x), Value::int(1)),
        )],
    );
    let y = int("y");
    let g = FuncDecl::new(
        "g",
        vec![y.clone()],
        vec![],
        vec![
            Stmt::call("inc", vec![Value::Var(y.clone())]),
            Stmt::call("PrintInt", vec![Value::Var(y)]),
        ],
    );
    let module = validates(compile(vec![inc, g]));
    let g = module.hlir.iter().find(|f| f.name == "g").unwrap();
    assert_eq!(
        g.body[0],
        call("inc", vec![Register::pointer(Register::param(0))], false)
    );
}

#[test]
fn string_pairs_assign_to_string_references() {
    let p = var("p", Type::Str);
    let s = var("s", Type::Str);
    let f = FuncDecl::new(
        "f",
        vec![p.clone()],
        vec![],
        vec![
            Stmt::mut_(s.clone(), Value::string("a")),
            Stmt::assign(Value::Var(s.clone()), Value::Var(p)),
            Stmt::call("PrintString", vec![Value::Var(s)]),
        ],
    );
    let module = validates(compile(vec![f]));
    let body = &module.hlir[0].body;
    assert_eq!(
        body[1],
        Opcode::Arith {
            op: ArithOp::Sub,
            left: Register::param(1),
            right: Register::IntLit(8),
            dst: Register::Local(0),
        }
    );
}

#[test]
fn tail_calls_lower_to_return_call() {
    let n = int("n");
    let down = FuncDecl::new(
        "down",
        vec![n.clone()],
        vec![int("")],
        vec![
            if_stmt(
                Value::binary(BinaryOp::Eq, Value::Var(n.clone()), Value::int(0)),
                vec![Stmt::ret(Some(Value::int(0)))],
                None,
            ),
            Stmt::ret(Some(Value::call(
                "down",
                vec![Value::binary(BinaryOp::Sub, Value::Var(n), Value::int(1))],
            ))),
        ],
    );
    let module = validates(compile(vec![down]));
    let wasm = module.wasm.unwrap();
    let f = wasm.func("down").unwrap();
    assert!(f.body.contains(&Instr::ReturnCall("down".to_string())));
    assert!(!f.body.contains(&Instr::Call("down".to_string())));
}

#[test]
fn remainder_lowers_to_mod() {
    let x = int("x");
    let body = hlir_body(
        vec![FuncDecl::new(
            "rem",
            vec![x.clone()],
            vec![int("")],
            vec![Stmt::ret(Some(Value::binary(
                BinaryOp::Mod,
                Value::Var(x),
                Value::int(3),
            )))],
        )],
        "rem",
    );
    assert!(matches!(
        body[0],
        Opcode::Arith {
            op: ArithOp::Mod,
            ..
        }
    ));
}
