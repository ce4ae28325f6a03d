use anyhow::Result;
use std::sync::Arc;

use tarndb::catalog::value::DataValue;
use tarndb::catalog::{Catalog, Column, DataType, Schema};
use tarndb::query::executor::{
    AggregateExpr, AggregateFunction, AggregationExecutor, DeleteExecutor, Executor,
    ExecutorContext, IndexScanExecutor, InsertExecutor, JoinPredicate, JoinType,
    NestedIndexJoinExecutor, NestedLoopJoinExecutor, OrderBy, OrderDirection, SeqScanExecutor,
    SortExecutor, TopNExecutor,
};
use tarndb::storage::table::Tuple;
use tarndb::transaction::{
    IsolationLevel, LockManager, TransactionManager, TransactionState,
};
use tempfile::NamedTempFile;

mod common;
use common::MockExecutor;

struct TestDb {
    ctx: Arc<ExecutorContext>,
    catalog: Arc<Catalog>,
    txn_manager: Arc<TransactionManager>,
    _file: NamedTempFile,
}

fn setup(isolation_level: IsolationLevel) -> Result<TestDb> {
    let (buffer_pool, catalog, file) = common::create_test_catalog(64)?;
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = Arc::new(TransactionManager::new(lock_manager.clone()));
    let txn = txn_manager.begin(isolation_level);
    let ctx = Arc::new(ExecutorContext {
        buffer_pool,
        catalog: catalog.clone(),
        lock_manager,
        txn,
    });
    Ok(TestDb {
        ctx,
        catalog,
        txn_manager,
        _file: file,
    })
}

fn users_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", DataType::Integer),
        Column::new("name", DataType::Text),
        Column::new("score", DataType::Float),
    ])
}

fn user_row(id: i64, name: &str, score: f64) -> Tuple {
    Tuple::new(vec![
        DataValue::Integer(id),
        DataValue::Text(name.to_string()),
        DataValue::Float(score),
    ])
}

fn insert_users(db: &TestDb, table_id: u32, rows: Vec<Tuple>) -> Result<i64> {
    let child = Box::new(MockExecutor::new(users_schema(), rows));
    let mut insert = InsertExecutor::new(db.ctx.clone(), table_id, child);
    insert.init()?;
    let (result, _) = insert.next()?.expect("insert emits a count row");
    assert!(insert.next()?.is_none());
    Ok(result.value(0).and_then(|v| v.as_integer()).unwrap())
}

fn drain(executor: &mut dyn Executor) -> Result<Vec<Tuple>> {
    let mut rows = Vec::new();
    while let Some((tuple, _)) = executor.next()? {
        rows.push(tuple);
    }
    Ok(rows)
}

#[test]
fn test_insert_then_seq_scan() -> Result<()> {
    let db = setup(IsolationLevel::RepeatableRead)?;
    let table = db.catalog.create_table("users", users_schema())?;

    let count = insert_users(
        &db,
        table.id,
        vec![
            user_row(1, "ada", 3.5),
            user_row(2, "grace", 4.0),
            user_row(3, "edsger", 2.5),
        ],
    )?;
    assert_eq!(count, 3);

    // the insert left IX on the table, which covers the same-txn scan
    assert!(db
        .ctx
        .txn
        .locks()
        .intention_exclusive_tables
        .contains(&table.id));

    let mut scan = SeqScanExecutor::new(db.ctx.clone(), table.id, None);
    scan.init()?;
    let rows = drain(&mut scan)?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], user_row(1, "ada", 3.5));
    assert!(db.ctx.txn.locks().shared_tables.is_empty());
    Ok(())
}

#[test]
fn test_seq_scan_projection() -> Result<()> {
    let db = setup(IsolationLevel::RepeatableRead)?;
    let table = db.catalog.create_table("users", users_schema())?;
    insert_users(&db, table.id, vec![user_row(1, "ada", 3.5)])?;

    let mut scan = SeqScanExecutor::new(
        db.ctx.clone(),
        table.id,
        Some(vec!["name".to_string(), "id".to_string()]),
    );
    scan.init()?;
    assert_eq!(scan.output_schema().columns()[0].name, "name");

    let rows = drain(&mut scan)?;
    assert_eq!(
        rows[0],
        Tuple::new(vec![DataValue::Text("ada".into()), DataValue::Integer(1)])
    );
    Ok(())
}

/// Under READ_COMMITTED the scan's IS lock is released at EOF, and a later
/// lock acquisition still finds the transaction growing.
#[test]
fn test_read_committed_scan_releases_lock() -> Result<()> {
    let db = setup(IsolationLevel::ReadCommitted)?;
    let table = db.catalog.create_table("users", users_schema())?;
    let other = db.catalog.create_table("other", users_schema())?;
    insert_users(&db, table.id, vec![user_row(1, "ada", 3.5)])?;

    // scan from a second transaction (IS is compatible with the writer's IX)
    let reader = db.txn_manager.begin(IsolationLevel::ReadCommitted);
    let reader_ctx = Arc::new(ExecutorContext {
        buffer_pool: db.ctx.buffer_pool.clone(),
        catalog: db.ctx.catalog.clone(),
        lock_manager: db.ctx.lock_manager.clone(),
        txn: reader.clone(),
    });

    let mut scan = SeqScanExecutor::new(reader_ctx.clone(), table.id, None);
    scan.init()?;
    assert!(reader.locks().intention_shared_tables.contains(&table.id));

    drain(&mut scan)?;
    assert!(!reader.locks().intention_shared_tables.contains(&table.id));
    assert_eq!(reader.state(), TransactionState::Growing);

    // a subsequent acquisition on another table succeeds
    assert!(reader_ctx
        .lock_manager
        .lock_table(&reader, tarndb::transaction::LockMode::Shared, other.id)
        .unwrap());
    Ok(())
}

#[test]
fn test_insert_maintains_index_and_index_scan() -> Result<()> {
    let db = setup(IsolationLevel::RepeatableRead)?;
    let table = db.catalog.create_table("users", users_schema())?;
    let index = db.catalog.create_index("users_id", table.id, 0)?;

    insert_users(
        &db,
        table.id,
        vec![
            user_row(30, "carol", 1.0),
            user_row(10, "ada", 2.0),
            user_row(20, "bob", 3.0),
        ],
    )?;

    // point probes resolve through the tree to the heap
    let rid = index.tree.get_value(&20)?.expect("indexed key");
    assert_eq!(table.heap.get_tuple(rid)?, Some(user_row(20, "bob", 3.0)));

    // the index scan returns rows in key order
    let mut scan = IndexScanExecutor::new(db.ctx.clone(), index.clone());
    scan.init()?;
    let ids: Vec<i64> = drain(&mut scan)?
        .iter()
        .map(|t| t.value(0).and_then(|v| v.as_integer()).unwrap())
        .collect();
    assert_eq!(ids, vec![10, 20, 30]);
    Ok(())
}

#[test]
fn test_delete_removes_rows_and_index_entries() -> Result<()> {
    let db = setup(IsolationLevel::RepeatableRead)?;
    let table = db.catalog.create_table("users", users_schema())?;
    let index = db.catalog.create_index("users_id", table.id, 0)?;

    insert_users(
        &db,
        table.id,
        vec![
            user_row(1, "ada", 1.0),
            user_row(2, "bob", 2.0),
            user_row(3, "carol", 3.0),
        ],
    )?;

    // delete everything the scan produces
    let child = Box::new(SeqScanExecutor::new(db.ctx.clone(), table.id, None));
    let mut delete = DeleteExecutor::new(db.ctx.clone(), table.id, child);
    delete.init()?;
    let (result, _) = delete.next()?.expect("delete emits a count row");
    assert_eq!(result.value(0).and_then(|v| v.as_integer()), Some(3));

    let mut scan = SeqScanExecutor::new(db.ctx.clone(), table.id, None);
    scan.init()?;
    assert!(drain(&mut scan)?.is_empty());
    assert_eq!(index.tree.get_value(&1)?, None);
    assert!(index.tree.is_empty());
    Ok(())
}

#[test]
fn test_nested_loop_join_inner_and_left() -> Result<()> {
    let people = Schema::new(vec![
        Column::new("id", DataType::Integer),
        Column::new("name", DataType::Text),
    ]);
    let orders = Schema::new(vec![
        Column::new("person_id", DataType::Integer),
        Column::new("order_id", DataType::Integer),
    ]);
    let people_rows = vec![
        Tuple::new(vec![DataValue::Integer(1), DataValue::Text("ada".into())]),
        Tuple::new(vec![DataValue::Integer(2), DataValue::Text("bob".into())]),
        Tuple::new(vec![DataValue::Integer(3), DataValue::Text("carol".into())]),
    ];
    let order_rows = vec![
        Tuple::new(vec![DataValue::Integer(1), DataValue::Integer(101)]),
        Tuple::new(vec![DataValue::Integer(2), DataValue::Integer(102)]),
        Tuple::new(vec![DataValue::Integer(1), DataValue::Integer(103)]),
    ];

    let predicate = JoinPredicate {
        left_column: 0,
        right_column: 0,
    };

    let mut inner = NestedLoopJoinExecutor::new(
        Box::new(MockExecutor::new(people.clone(), people_rows.clone())),
        Box::new(MockExecutor::new(orders.clone(), order_rows.clone())),
        predicate,
        JoinType::Inner,
    );
    inner.init()?;
    let rows = drain(&mut inner)?;
    assert_eq!(rows.len(), 3); // ada x2, bob x1
    assert_eq!(rows[0].value(3), Some(&DataValue::Integer(101)));

    let mut left = NestedLoopJoinExecutor::new(
        Box::new(MockExecutor::new(people, people_rows)),
        Box::new(MockExecutor::new(orders, order_rows)),
        predicate,
        JoinType::Left,
    );
    left.init()?;
    let rows = drain(&mut left)?;
    // carol appears NULL-padded
    assert_eq!(rows.len(), 4);
    let carol = rows
        .iter()
        .find(|t| t.value(1) == Some(&DataValue::Text("carol".into())))
        .expect("left join keeps unmatched outer rows");
    assert_eq!(carol.value(2), Some(&DataValue::Null));
    assert_eq!(carol.value(3), Some(&DataValue::Null));
    Ok(())
}

#[test]
fn test_nested_index_join() -> Result<()> {
    let db = setup(IsolationLevel::RepeatableRead)?;
    let table = db.catalog.create_table("users", users_schema())?;
    let index = db.catalog.create_index("users_id", table.id, 0)?;

    insert_users(
        &db,
        table.id,
        vec![user_row(1, "ada", 1.0), user_row(2, "bob", 2.0)],
    )?;

    let outer_schema = Schema::new(vec![Column::new("user_id", DataType::Integer)]);
    let outer_rows = vec![
        Tuple::new(vec![DataValue::Integer(2)]),
        Tuple::new(vec![DataValue::Integer(7)]),
    ];

    let mut join = NestedIndexJoinExecutor::new(
        db.ctx.clone(),
        Box::new(MockExecutor::new(outer_schema.clone(), outer_rows.clone())),
        index.clone(),
        0,
        JoinType::Inner,
    );
    join.init()?;
    let rows = drain(&mut join)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value(2), Some(&DataValue::Text("bob".into())));

    let mut left = NestedIndexJoinExecutor::new(
        db.ctx.clone(),
        Box::new(MockExecutor::new(outer_schema, outer_rows)),
        index,
        0,
        JoinType::Left,
    );
    left.init()?;
    let rows = drain(&mut left)?;
    assert_eq!(rows.len(), 2);
    // the unmatched probe key 7 is NULL-padded across the inner schema
    assert_eq!(rows[1].value(0), Some(&DataValue::Integer(7)));
    assert_eq!(rows[1].value(1), Some(&DataValue::Null));
    Ok(())
}

#[test]
fn test_aggregation_with_groups() -> Result<()> {
    let schema = Schema::new(vec![
        Column::new("dept", DataType::Text),
        Column::new("salary", DataType::Integer),
    ]);
    let rows = vec![
        Tuple::new(vec![DataValue::Text("eng".into()), DataValue::Integer(100)]),
        Tuple::new(vec![DataValue::Text("ops".into()), DataValue::Integer(70)]),
        Tuple::new(vec![DataValue::Text("eng".into()), DataValue::Integer(120)]),
    ];

    let mut agg = AggregationExecutor::new(
        Box::new(MockExecutor::new(schema, rows)),
        vec![0],
        vec![
            AggregateExpr {
                function: AggregateFunction::Count,
                column: None,
            },
            AggregateExpr {
                function: AggregateFunction::Sum,
                column: Some(1),
            },
            AggregateExpr {
                function: AggregateFunction::Min,
                column: Some(1),
            },
            AggregateExpr {
                function: AggregateFunction::Max,
                column: Some(1),
            },
        ],
    );
    agg.init()?;
    let rows = drain(&mut agg)?;
    assert_eq!(rows.len(), 2);

    // groups come out in first-seen order
    assert_eq!(
        rows[0],
        Tuple::new(vec![
            DataValue::Text("eng".into()),
            DataValue::Integer(2),
            DataValue::Integer(220),
            DataValue::Integer(100),
            DataValue::Integer(120),
        ])
    );
    assert_eq!(
        rows[1],
        Tuple::new(vec![
            DataValue::Text("ops".into()),
            DataValue::Integer(1),
            DataValue::Integer(70),
            DataValue::Integer(70),
            DataValue::Integer(70),
        ])
    );
    Ok(())
}

#[test]
fn test_aggregation_empty_input_emits_initials() -> Result<()> {
    let schema = Schema::new(vec![Column::new("x", DataType::Integer)]);
    let mut agg = AggregationExecutor::new(
        Box::new(MockExecutor::new(schema, Vec::new())),
        Vec::new(),
        vec![
            AggregateExpr {
                function: AggregateFunction::Count,
                column: None,
            },
            AggregateExpr {
                function: AggregateFunction::Sum,
                column: Some(0),
            },
            AggregateExpr {
                function: AggregateFunction::Max,
                column: Some(0),
            },
        ],
    );
    agg.init()?;
    let rows = drain(&mut agg)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0],
        Tuple::new(vec![
            DataValue::Integer(0),
            DataValue::Null,
            DataValue::Null,
        ])
    );

    // but with a group-by key, empty input yields no rows
    let schema = Schema::new(vec![Column::new("x", DataType::Integer)]);
    let mut grouped = AggregationExecutor::new(
        Box::new(MockExecutor::new(schema, Vec::new())),
        vec![0],
        vec![AggregateExpr {
            function: AggregateFunction::Count,
            column: None,
        }],
    );
    grouped.init()?;
    assert!(drain(&mut grouped)?.is_empty());
    Ok(())
}

#[test]
fn test_sort_multi_key() -> Result<()> {
    let schema = Schema::new(vec![
        Column::new("dept", DataType::Text),
        Column::new("salary", DataType::Integer),
    ]);
    let rows = vec![
        Tuple::new(vec![DataValue::Text("ops".into()), DataValue::Integer(70)]),
        Tuple::new(vec![DataValue::Text("eng".into()), DataValue::Integer(100)]),
        Tuple::new(vec![DataValue::Text("eng".into()), DataValue::Integer(120)]),
    ];

    let mut sort = SortExecutor::new(
        Box::new(MockExecutor::new(schema, rows)),
        vec![
            OrderBy {
                column: 0,
                direction: OrderDirection::Asc,
            },
            OrderBy {
                column: 1,
                direction: OrderDirection::Desc,
            },
        ],
    );
    sort.init()?;
    let rows = drain(&mut sort)?;
    assert_eq!(rows[0].value(1), Some(&DataValue::Integer(120)));
    assert_eq!(rows[1].value(1), Some(&DataValue::Integer(100)));
    assert_eq!(rows[2].value(1), Some(&DataValue::Integer(70)));
    Ok(())
}

#[test]
fn test_topn_keeps_n_best() -> Result<()> {
    let schema = Schema::new(vec![Column::new("x", DataType::Integer)]);
    let rows: Vec<Tuple> = [5i64, 1, 9, 3, 7, 2, 8]
        .iter()
        .map(|&x| Tuple::new(vec![DataValue::Integer(x)]))
        .collect();

    let mut topn = TopNExecutor::new(
        Box::new(MockExecutor::new(schema, rows)),
        vec![OrderBy {
            column: 0,
            direction: OrderDirection::Asc,
        }],
        3,
    );
    topn.init()?;
    let rows = drain(&mut topn)?;
    let values: Vec<i64> = rows
        .iter()
        .map(|t| t.value(0).and_then(|v| v.as_integer()).unwrap())
        .collect();
    assert_eq!(values, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn test_insert_lock_conflict_aborts_second_txn() -> Result<()> {
    let db = setup(IsolationLevel::RepeatableRead)?;
    let table = db.catalog.create_table("users", users_schema())?;
    insert_users(&db, table.id, vec![user_row(1, "ada", 1.0)])?;

    // a second transaction that already released a lock is shrinking and
    // cannot start an insert
    let other = db.txn_manager.begin(IsolationLevel::RepeatableRead);
    let other_ctx = Arc::new(ExecutorContext {
        buffer_pool: db.ctx.buffer_pool.clone(),
        catalog: db.ctx.catalog.clone(),
        lock_manager: db.ctx.lock_manager.clone(),
        txn: other.clone(),
    });
    db.ctx
        .lock_manager
        .lock_table(&other, tarndb::transaction::LockMode::Shared, 99)
        .unwrap();
    db.ctx.lock_manager.unlock_table(&other, 99).unwrap();

    let child = Box::new(MockExecutor::new(users_schema(), vec![user_row(9, "x", 0.0)]));
    let mut insert = InsertExecutor::new(other_ctx, table.id, child);
    let err = insert.init().unwrap_err();
    assert!(matches!(
        err,
        tarndb::query::executor::ExecutorError::TransactionAborted(_)
    ));
    assert_eq!(other.state(), TransactionState::Aborted);
    Ok(())
}
