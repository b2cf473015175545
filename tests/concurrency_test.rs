use futures::future::join_all;
use guildbank::db::init_db;
use guildbank::domain::{Membership, MembershipStatus, Role};
use guildbank::engine::{CreateSale, DrawOutcome, Economy, SaleError};
use guildbank::notify::LogNotifier;
use guildbank::{Config, GuildId, Repository, SaleStatus};
use std::sync::Arc;
use tempfile::TempDir;

struct TestEconomy {
    economy: Economy,
    guild: GuildId,
    members: Vec<Membership>,
    _temp: TempDir,
}

async fn setup(member_count: usize) -> TestEconomy {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let config = Config {
        port: 0,
        database_path: db_path,
        db_max_connections: 5,
        default_tax_percent: 0,
        max_page_size: 100,
        default_sale_duration_hours: 24,
        notify_webhook_url: None,
    };
    let economy = Economy::new(repo, Arc::new(LogNotifier), &config);

    let guild = economy.roster.create_guild("Blackwater").await.unwrap();
    let mut members = Vec::new();
    for i in 0..member_count {
        members.push(
            economy
                .roster
                .register_member(
                    guild.id,
                    &format!("Raider{}", i),
                    Role::Member,
                    MembershipStatus::Active,
                )
                .await
                .unwrap(),
        );
    }

    TestEconomy {
        economy,
        guild: guild.id,
        members,
        _temp: temp_dir,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adjustments_lose_no_updates() {
    let t = setup(2).await;
    let target = t.members[0].id;
    t.economy
        .balances
        .adjust(target, 1_000, "Opening balance", None)
        .await
        .unwrap();

    const N: usize = 50;
    let tasks = (0..N).map(|i| {
        let balances = t.economy.balances.clone();
        tokio::spawn(async move {
            balances
                .adjust(target, 1, &format!("Tick {}", i), None)
                .await
        })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let member = t.economy.roster.get_membership(target).await.unwrap();
    assert_eq!(member.balance, 1_000 + N as i64);

    let audit = t.economy.balances.verify(target).await.unwrap();
    assert!(audit.consistent);
    assert_eq!(audit.transaction_count, N + 1);

    // The other membership was never touched.
    let bystander = t.economy.balances.verify(t.members[1].id).await.unwrap();
    assert_eq!(bystander.transaction_count, 0);
    assert_eq!(bystander.stored_balance, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_draws_award_exactly_one_winner() {
    let t = setup(5).await;
    let sale = t
        .economy
        .sales
        .create_sale(CreateSale {
            guild_id: t.guild,
            created_by: t.members[0].id,
            price: 5_000_000,
            duration_hours: None,
            repair_cost: 0,
            bonus_amount: 0,
            description: Some("Bag of T8".to_string()),
        })
        .await
        .unwrap();
    for member in &t.members {
        t.economy.sales.sign_up(sale.id, member.id).await.unwrap();
    }

    const M: usize = 16;
    let tasks = (0..M).map(|_| {
        let draws = t.economy.draws.clone();
        let sale_id = sale.id;
        tokio::spawn(async move { draws.draw(sale_id).await })
    });
    let outcomes: Vec<DrawOutcome> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let winners: Vec<_> = outcomes
        .iter()
        .filter_map(|o| match o {
            DrawOutcome::Drawn { winner, .. } => Some(*winner),
            _ => None,
        })
        .collect();
    let not_found = outcomes
        .iter()
        .filter(|o| matches!(o, DrawOutcome::NotFound))
        .count();
    assert_eq!(winners.len(), 1);
    assert_eq!(not_found, M - 1);

    let stored = t.economy.sales.get_sale(sale.id).await.unwrap();
    assert_eq!(stored.status, SaleStatus::Drawn);
    assert_eq!(stored.winner_id, Some(winners[0]));
    assert!(t.members.iter().any(|m| m.id == winners[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_draws_without_bids_cancel_once() {
    let t = setup(1).await;
    let sale = t
        .economy
        .sales
        .create_sale(CreateSale {
            guild_id: t.guild,
            created_by: t.members[0].id,
            price: 1_000,
            duration_hours: Some(1),
            repair_cost: 0,
            bonus_amount: 0,
            description: None,
        })
        .await
        .unwrap();

    let tasks = (0..8).map(|_| {
        let draws = t.economy.draws.clone();
        let sale_id = sale.id;
        tokio::spawn(async move { draws.draw(sale_id).await })
    });
    let outcomes: Vec<DrawOutcome> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let cancelled = outcomes
        .iter()
        .filter(|o| matches!(o, DrawOutcome::NoBids { .. }))
        .count();
    assert_eq!(cancelled, 1);
    assert_eq!(
        t.economy.sales.get_sale(sale.id).await.unwrap().status,
        SaleStatus::Cancelled
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_signups_and_tags_stay_unique() {
    let t = setup(3).await;
    let sale = t
        .economy
        .sales
        .create_sale(CreateSale {
            guild_id: t.guild,
            created_by: t.members[0].id,
            price: 1_000,
            duration_hours: None,
            repair_cost: 0,
            bonus_amount: 0,
            description: None,
        })
        .await
        .unwrap();

    let signups = (0..10).map(|_| {
        let sales = t.economy.sales.clone();
        let (sale_id, member) = (sale.id, t.members[1].id);
        tokio::spawn(async move { sales.sign_up(sale_id, member).await })
    });
    for result in join_all(signups).await {
        result.unwrap().unwrap();
    }
    assert_eq!(t.economy.sales.list_bids(sale.id).await.unwrap().len(), 1);

    t.economy.draws.draw(sale.id).await.unwrap();

    let names: Vec<String> = t.members.iter().map(|m| m.display_name.clone()).collect();
    let tags = (0..10).map(|_| {
        let tagger = t.economy.tagger.clone();
        let (sale_id, names, by) = (sale.id, names.clone(), t.members[0].id);
        tokio::spawn(async move { tagger.tag(sale_id, &names, by).await })
    });
    let outcomes: Vec<_> = join_all(tags)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let added: usize = outcomes.iter().map(|o| o.added.len()).sum();
    assert_eq!(added, t.members.len());
    assert_eq!(
        t.economy.tagger.list(sale.id).await.unwrap().len(),
        t.members.len()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_splits_pay_once() {
    let t = setup(3).await;
    let sale = t
        .economy
        .sales
        .create_sale(CreateSale {
            guild_id: t.guild,
            created_by: t.members[0].id,
            price: 3_000,
            duration_hours: None,
            repair_cost: 0,
            bonus_amount: 0,
            description: None,
        })
        .await
        .unwrap();
    t.economy
        .sales
        .sign_up(sale.id, t.members[0].id)
        .await
        .unwrap();
    t.economy.draws.draw(sale.id).await.unwrap();
    let names: Vec<String> = t.members.iter().map(|m| m.display_name.clone()).collect();
    t.economy
        .tagger
        .tag(sale.id, &names, t.members[0].id)
        .await
        .unwrap();

    let splits = (0..6).map(|_| {
        let engine = t.economy.splits.clone();
        let sale_id = sale.id;
        tokio::spawn(async move { engine.split_sale(sale_id, None, None, None).await })
    });
    let succeeded = join_all(splits)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    assert!(succeeded >= 1);

    for member in &t.members {
        let audit = t.economy.balances.verify(member.id).await.unwrap();
        assert!(audit.consistent);
        assert_eq!(audit.stored_balance, 1_000);
        assert_eq!(audit.transaction_count, 1);
    }
    assert!(t.economy.sales.get_sale(sale.id).await.unwrap().split_completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tag_racing_split_is_paid_or_refused() {
    let t = setup(4).await;
    let late = t.members[3].clone();

    for round in 0..8 {
        let sale = t
            .economy
            .sales
            .create_sale(CreateSale {
                guild_id: t.guild,
                created_by: t.members[0].id,
                price: 1_200,
                duration_hours: None,
                repair_cost: 0,
                bonus_amount: 0,
                description: Some(format!("Round {}", round)),
            })
            .await
            .unwrap();
        t.economy
            .sales
            .sign_up(sale.id, t.members[0].id)
            .await
            .unwrap();
        t.economy.draws.draw(sale.id).await.unwrap();
        let early: Vec<String> = t.members[..3]
            .iter()
            .map(|m| m.display_name.clone())
            .collect();
        t.economy
            .tagger
            .tag(sale.id, &early, t.members[0].id)
            .await
            .unwrap();

        let engine = t.economy.splits.clone();
        let tagger = t.economy.tagger.clone();
        let (sale_id, by, late_name) = (sale.id, t.members[0].id, late.display_name.clone());
        let split = tokio::spawn(async move { engine.split_sale(sale_id, None, None, None).await });
        let tag = tokio::spawn(async move { tagger.tag(sale_id, &[late_name], by).await });

        let report = split.await.unwrap().unwrap();
        let tag_result = tag.await.unwrap();

        let tagged: Vec<_> = t
            .economy
            .tagger
            .list(sale.id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.membership_id)
            .collect();
        let mut paid: Vec<_> = report.recipients.iter().map(|r| r.membership_id).collect();
        paid.sort();
        let mut tagged_sorted = tagged.clone();
        tagged_sorted.sort();

        // Whoever is tagged when the split closes is exactly who got paid.
        assert_eq!(paid, tagged_sorted);
        match tag_result {
            Ok(outcome) if outcome.added.len() == 1 => {
                assert!(tagged.contains(&late.id));
                assert_eq!(report.recipients.len(), 4);
            }
            Ok(other) => panic!("unexpected tag outcome {:?}", other),
            Err(SaleError::InvalidState { .. }) => {
                assert!(!tagged.contains(&late.id));
                assert_eq!(report.recipients.len(), 3);
            }
            Err(other) => panic!("unexpected tag error {:?}", other),
        }
        assert_eq!(report.total_distributed, 1_200);
    }

    for member in &t.members {
        assert!(t.economy.balances.verify(member.id).await.unwrap().consistent);
    }
}
