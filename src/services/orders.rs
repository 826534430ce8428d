//! Checkout and the order lifecycle.
//!
//! Checkout, cancellation and refunds each commit every document they touch
//! (products, orders, coupon counters, cart, wallet and ledger) in one batch,
//! retried on write conflicts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::{
    db::{with_retry, Batch, Db, Direction, Query},
    error::{AppError, AppResult},
    models::{
        cart::shipping_for, new_id, order::generate_order_number, ActivityKind, Address, Cart,
        Currency, Order, OrderItem, OrderStatus, Page, PageParams, PaymentMethod, PaymentStatus,
        Product, Tracking, TransactionKind, User, WalletTransaction,
    },
    services::{
        activity, coupons,
        wallets::{self, Movement},
    },
};

const TOP_PRODUCTS: usize = 10;

#[derive(Debug, Deserialize)]
pub struct CheckoutInput {
    pub shipping_address: Address,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResult {
    pub orders: Vec<Order>,
    pub total_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_transaction: Option<WalletTransaction>,
}

/// Whose orders a listing covers
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderScope {
    Customer,
    Seller,
    All,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderFilters {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub scope: Option<OrderScope>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateInput {
    pub status: OrderStatus,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelInput {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RefundInput {
    pub amount_cents: i64,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentUpdateInput {
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub store_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TopProduct {
    pub product_id: String,
    pub name: String,
    pub quantity: u64,
    pub revenue_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct OrderAnalytics {
    pub total_orders: usize,
    pub by_status: BTreeMap<String, usize>,
    pub revenue_cents: i64,
    pub refunded_cents: i64,
    pub average_order_value_cents: i64,
    pub top_products: Vec<TopProduct>,
}

#[derive(Debug, Serialize)]
pub struct OrderStats {
    pub total_orders: usize,
    pub pending_orders: usize,
    pub delivered_orders: usize,
    pub cancelled_orders: usize,
    pub orders_today: usize,
    pub revenue_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct StatusInfo {
    pub status: OrderStatus,
    pub next: Vec<OrderStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Customer,
    Seller,
    Admin,
}

fn access(order: &Order, user: &User) -> Option<Access> {
    if user.role.is_admin() {
        Some(Access::Admin)
    } else if order.seller_id == user.id {
        Some(Access::Seller)
    } else if order.customer_id == user.id {
        Some(Access::Customer)
    } else {
        None
    }
}

fn require_access(order: &Order, user: &User) -> AppResult<Access> {
    access(order, user).ok_or_else(|| {
        AppError::forbidden("ORDER_ACCESS_DENIED", "You do not have access to this order")
    })
}

fn require_merchant(order: &Order, user: &User) -> AppResult<()> {
    match require_access(order, user)? {
        Access::Seller | Access::Admin => Ok(()),
        Access::Customer => Err(AppError::forbidden(
            "SELLER_REQUIRED",
            "Only the store or an admin can do this",
        )),
    }
}

/// Splits `discount` across groups in proportion to their subtotals; the
/// last group absorbs rounding
fn allocate_discount(discount: i64, subtotals: &[i64]) -> Vec<i64> {
    let total: i64 = subtotals.iter().sum();
    if discount <= 0 || total <= 0 {
        return vec![0; subtotals.len()];
    }
    let mut shares = Vec::with_capacity(subtotals.len());
    let mut allocated = 0;
    for (i, subtotal) in subtotals.iter().enumerate() {
        let share = if i + 1 == subtotals.len() {
            discount - allocated
        } else {
            discount * subtotal / total
        };
        allocated += share;
        shares.push(share);
    }
    shares
}

// ============================================================================
// Checkout
// ============================================================================

struct StoreOrder {
    seller_id: String,
    currency: Currency,
    items: Vec<OrderItem>,
}

/// Turns the cart into one order per store
pub async fn checkout(db: &Db, user: &User, input: CheckoutInput) -> AppResult<CheckoutResult> {
    let missing = input.shipping_address.missing_fields();
    if !missing.is_empty() {
        return Err(AppError::invalid(format!(
            "Missing shipping address fields: {}",
            missing.join(", ")
        )));
    }

    let result = with_retry("checkout", || async {
        let now = Utc::now();
        let mut batch = db.batch();

        // 1. Cart
        let mut cart = db
            .get_versioned::<Cart>(&user.id)
            .await?
            .filter(|c| !c.items.is_empty())
            .ok_or_else(|| AppError::invalid("Your cart is empty"))?;

        // 2. Reserve stock at current prices
        let mut groups: BTreeMap<String, StoreOrder> = BTreeMap::new();
        for line in &cart.items {
            let mut product = db
                .get_versioned::<Product>(&line.product_id)
                .await?
                .filter(|p| p.is_purchasable())
                .ok_or_else(|| AppError::invalid(format!("{} is no longer available", line.name)))?;
            if product.stock < line.quantity {
                return Err(AppError::InsufficientStock(format!(
                    "Only {} of {} left",
                    product.stock, product.name
                )));
            }
            product.stock -= line.quantity;
            product.sales_count += line.quantity as u64;
            product.sync_stock_status();
            product.updated_at = now;
            batch.update(&product)?;

            let mut purchase = activity::new_activity(&user.id, ActivityKind::Purchase, &product.id);
            purchase.creator_id = Some(product.seller_id.clone());
            purchase.category = product.category.clone();
            batch.insert(&purchase)?;

            groups
                .entry(product.store_id.clone())
                .or_insert_with(|| StoreOrder {
                    seller_id: product.seller_id.clone(),
                    currency: product.currency,
                    items: Vec::new(),
                })
                .items
                .push(OrderItem {
                    product_id: product.id.clone(),
                    name: product.name.clone(),
                    image: product.images.first().cloned(),
                    unit_price_cents: product.price_cents,
                    quantity: line.quantity,
                    line_total_cents: product.price_cents * line.quantity as i64,
                });
        }

        // 3. Coupon
        let subtotals: Vec<i64> = groups
            .values()
            .map(|g| g.items.iter().map(|i| i.line_total_cents).sum())
            .collect();
        let subtotal: i64 = subtotals.iter().sum();
        let discount = match &cart.coupon_code {
            Some(code) => coupons::stage_use(db, &mut batch, code, &user.id, subtotal, now).await?,
            None => 0,
        };
        let shares = allocate_discount(discount, &subtotals);

        // 4. Orders
        let mut orders = Vec::with_capacity(groups.len());
        for ((store_id, group), (group_subtotal, share)) in
            groups.into_iter().zip(subtotals.iter().zip(&shares))
        {
            let shipping = shipping_for(*group_subtotal);
            let mut order = Order {
                id: new_id(),
                order_number: generate_order_number(now),
                customer_id: user.id.clone(),
                store_id,
                seller_id: group.seller_id,
                items: group.items,
                subtotal_cents: *group_subtotal,
                discount_cents: *share,
                shipping_cents: shipping,
                total_cents: group_subtotal - share + shipping,
                currency: group.currency,
                coupon_code: cart.coupon_code.clone(),
                shipping_address: input.shipping_address.clone(),
                payment_method: input.payment_method,
                payment_status: PaymentStatus::Pending,
                payment_transaction_id: None,
                refunded_cents: 0,
                status: OrderStatus::Pending,
                status_history: Vec::new(),
                tracking: None,
                notes: input.notes.clone(),
                cancel_reason: None,
                can_review: false,
                confirmed_at: None,
                shipped_at: None,
                delivered_at: None,
                cancelled_at: None,
                created_at: now,
                updated_at: now,
            };
            order.record_status(OrderStatus::Pending, Some("Order placed".to_string()), &user.id);
            orders.push(order);
        }
        let total: i64 = orders.iter().map(|o| o.total_cents).sum();

        // 5. Wallet payment
        let mut wallet_transaction = None;
        if input.payment_method == PaymentMethod::Wallet {
            let numbers: Vec<&str> = orders.iter().map(|o| o.order_number.as_str()).collect();
            let movement = Movement::new(
                TransactionKind::Purchase,
                total,
                format!("Payment for {}", numbers.join(", ")),
            )
            .reference(&orders[0].id);
            let transaction = wallets::stage_movement(db, &mut batch, &user.id, &movement, now).await?;
            for order in &mut orders {
                order.payment_status = PaymentStatus::Paid;
                order.payment_transaction_id = Some(transaction.id.clone());
            }
            wallet_transaction = Some(transaction);
        }

        // 6. Orders and the emptied cart
        for order in &orders {
            batch.insert(order)?;
        }
        cart.clear();
        batch.update(&cart)?;

        batch.commit().await?;
        Ok(CheckoutResult {
            orders,
            total_cents: total,
            wallet_transaction,
        })
    })
    .await?;

    tracing::info!(
        user_id = %user.id,
        orders = result.orders.len(),
        total_cents = result.total_cents,
        payment_method = ?input.payment_method,
        "Checkout completed"
    );
    Ok(result)
}

// ============================================================================
// Reads
// ============================================================================

pub async fn get(db: &Db, order_id: &str, user: &User) -> AppResult<Order> {
    let order = db.require::<Order>(order_id).await?.into_inner();
    require_access(&order, user)?;
    Ok(order)
}

pub async fn list(db: &Db, user: &User, filters: &OrderFilters, params: &PageParams) -> AppResult<Page<Order>> {
    let default_scope = if user.role.is_admin() {
        OrderScope::All
    } else if user.role.is_seller() {
        OrderScope::Seller
    } else {
        OrderScope::Customer
    };
    let scope = filters.scope.unwrap_or(default_scope);

    let mut query = Query::new()
        .order_by("created_at", Direction::Desc)
        .offset(params.offset())
        .limit(params.limit() + 1);
    query = match scope {
        OrderScope::Customer => query.eq("customer_id", &user.id),
        OrderScope::Seller if user.role.is_seller() => query.eq("seller_id", &user.id),
        OrderScope::All if user.role.is_admin() => query,
        _ => {
            return Err(AppError::forbidden(
                "ORDER_ACCESS_DENIED",
                "You cannot list those orders",
            ))
        }
    };
    if let Some(status) = filters.status {
        query = query.eq("status", status);
    }
    if let Some(payment_status) = filters.payment_status {
        query = query.eq("payment_status", payment_status);
    }
    if let Some(from) = filters.from {
        query = query.gte("created_at", from);
    }
    if let Some(to) = filters.to {
        query = query.lte("created_at", to);
    }

    let items = db.find::<Order>(&query).await?;
    Ok(Page::from_overfetch(items, params))
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Returns stock for every item and refunds whatever a wallet paid
async fn stage_cancellation(
    db: &Db,
    batch: &mut Batch,
    order: &mut Order,
    reason: &str,
    actor_id: &str,
    now: DateTime<Utc>,
) -> AppResult<()> {
    for item in &order.items {
        if let Some(mut product) = db.get_versioned::<Product>(&item.product_id).await? {
            product.stock += item.quantity;
            product.sales_count = product.sales_count.saturating_sub(item.quantity as u64);
            product.sync_stock_status();
            product.updated_at = now;
            batch.update(&product)?;
        }
    }

    let paid = matches!(
        order.payment_status,
        PaymentStatus::Paid | PaymentStatus::PartiallyRefunded
    );
    if paid && order.payment_method == PaymentMethod::Wallet && order.refundable_cents() > 0 {
        let movement = Movement::new(
            TransactionKind::Refund,
            order.refundable_cents(),
            format!("Refund for cancelled order {}", order.order_number),
        )
        .reference(&order.id);
        wallets::stage_movement(db, batch, &order.customer_id, &movement, now).await?;
        order.refunded_cents = order.total_cents;
        order.payment_status = PaymentStatus::Refunded;
    }

    order.cancel_reason = Some(reason.to_string());
    order.record_status(OrderStatus::Cancelled, Some(reason.to_string()), actor_id);
    Ok(())
}

/// Seller or admin moves the order along its lifecycle
pub async fn update_status(db: &Db, order_id: &str, input: StatusUpdateInput, actor: &User) -> AppResult<Order> {
    if input.status == OrderStatus::Cancelled {
        let reason = input
            .note
            .clone()
            .unwrap_or_else(|| "Cancelled by seller".to_string());
        return cancel(db, order_id, &reason, actor).await;
    }

    let order = with_retry("update_order_status", || async {
        let mut order = db.require::<Order>(order_id).await?;
        require_merchant(&order, actor)?;
        if !order.status.can_transition_to(input.status) {
            return Err(AppError::InvalidTransition(format!(
                "Cannot change order from {} to {}",
                order.status, input.status
            )));
        }
        order.record_status(input.status, input.note.clone(), &actor.id);
        if input.status == OrderStatus::Delivered
            && order.payment_method == PaymentMethod::CashOnDelivery
            && order.payment_status == PaymentStatus::Pending
        {
            order.payment_status = PaymentStatus::Paid;
        }
        db.update(&order).await?;
        Ok(order.into_inner())
    })
    .await?;

    tracing::info!(order_id, status = %order.status, actor_id = %actor.id, "Order status updated");
    Ok(order)
}

pub async fn update_shipping(db: &Db, order_id: &str, tracking: Tracking, actor: &User) -> AppResult<Order> {
    let order = with_retry("update_order_shipping", || async {
        let mut order = db.require::<Order>(order_id).await?;
        require_merchant(&order, actor)?;
        if matches!(order.status, OrderStatus::Cancelled | OrderStatus::Returned) {
            return Err(AppError::invalid("Order is closed"));
        }
        order.tracking = Some(tracking.clone());
        order.updated_at = Utc::now();
        db.update(&order).await?;
        Ok(order.into_inner())
    })
    .await?;

    tracing::info!(order_id, actor_id = %actor.id, "Order tracking updated");
    Ok(order)
}

/// Cancels and restocks; customers may only cancel before processing starts
pub async fn cancel(db: &Db, order_id: &str, reason: &str, actor: &User) -> AppResult<Order> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::invalid("A cancellation reason is required"));
    }

    let order = with_retry("cancel_order", || async {
        let now = Utc::now();
        let mut order = db.require::<Order>(order_id).await?;
        let role = require_access(&order, actor)?;
        if role == Access::Customer
            && !matches!(order.status, OrderStatus::Pending | OrderStatus::Confirmed)
        {
            return Err(AppError::InvalidTransition(format!(
                "Orders that are {} can no longer be cancelled",
                order.status
            )));
        }
        if !order.status.can_transition_to(OrderStatus::Cancelled) {
            return Err(AppError::InvalidTransition(format!(
                "Cannot cancel an order that is {}",
                order.status
            )));
        }

        let mut batch = db.batch();
        stage_cancellation(db, &mut batch, &mut order, reason, &actor.id, now).await?;
        batch.update(&order)?;
        batch.commit().await?;
        Ok(order.into_inner())
    })
    .await?;

    tracing::info!(order_id, actor_id = %actor.id, reason, "Order cancelled");
    Ok(order)
}

/// Partial or full refund of a paid order
pub async fn refund(db: &Db, order_id: &str, input: RefundInput, actor: &User) -> AppResult<Order> {
    if input.amount_cents <= 0 {
        return Err(AppError::invalid("Refund amount must be greater than zero"));
    }
    let reason = input.reason.trim().to_string();
    if reason.is_empty() {
        return Err(AppError::invalid("A refund reason is required"));
    }

    let order = with_retry("refund_order", || async {
        let now = Utc::now();
        let mut order = db.require::<Order>(order_id).await?;
        require_merchant(&order, actor)?;
        if !matches!(
            order.payment_status,
            PaymentStatus::Paid | PaymentStatus::PartiallyRefunded
        ) {
            return Err(AppError::invalid("Only paid orders can be refunded"));
        }
        if input.amount_cents > order.refundable_cents() {
            return Err(AppError::invalid(format!(
                "Refund amount exceeds the refundable {} cents",
                order.refundable_cents()
            )));
        }

        let mut batch = db.batch();
        if order.payment_method == PaymentMethod::Wallet {
            let movement = Movement::new(
                TransactionKind::Refund,
                input.amount_cents,
                format!("Refund for order {}: {}", order.order_number, reason),
            )
            .reference(&order.id);
            wallets::stage_movement(db, &mut batch, &order.customer_id, &movement, now).await?;
        }
        order.refunded_cents += input.amount_cents;
        order.payment_status = if order.refundable_cents() == 0 {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        order.updated_at = now;
        batch.update(&order)?;
        batch.commit().await?;
        Ok(order.into_inner())
    })
    .await?;

    tracing::info!(
        order_id,
        amount_cents = input.amount_cents,
        refunded_cents = order.refunded_cents,
        actor_id = %actor.id,
        "Order refunded"
    );
    Ok(order)
}

/// Admin override of payment state
pub async fn update_payment(db: &Db, order_id: &str, input: PaymentUpdateInput) -> AppResult<Order> {
    let order = with_retry("update_order_payment", || async {
        let mut order = db.require::<Order>(order_id).await?;
        order.payment_status = input.payment_status;
        if let Some(transaction_id) = &input.transaction_id {
            order.payment_transaction_id = Some(transaction_id.clone());
        }
        order.updated_at = Utc::now();
        db.update(&order).await?;
        Ok(order.into_inner())
    })
    .await?;
    tracing::info!(order_id, payment_status = ?order.payment_status, "Order payment updated");
    Ok(order)
}

// ============================================================================
// Reporting
// ============================================================================

fn counts_as_revenue(order: &Order) -> bool {
    order.status != OrderStatus::Cancelled
        && (matches!(
            order.payment_status,
            PaymentStatus::Paid | PaymentStatus::PartiallyRefunded
        ) || order.status == OrderStatus::Delivered)
}

/// Order totals, revenue and best sellers, optionally for one store
pub async fn analytics(db: &Db, query: &AnalyticsQuery) -> AppResult<OrderAnalytics> {
    let mut filter = Query::new();
    if let Some(store_id) = &query.store_id {
        filter = filter.eq("store_id", store_id);
    }
    if let Some(from) = query.from {
        filter = filter.gte("created_at", from);
    }
    if let Some(to) = query.to {
        filter = filter.lte("created_at", to);
    }
    let orders = db.find::<Order>(&filter).await?;

    let mut by_status: BTreeMap<String, usize> = OrderStatus::ALL
        .iter()
        .map(|s| (s.to_string(), 0))
        .collect();
    let mut revenue = 0;
    let mut refunded = 0;
    let mut revenue_orders = 0i64;
    let mut products: HashMap<String, TopProduct> = HashMap::new();

    for order in &orders {
        *by_status.entry(order.status.to_string()).or_insert(0) += 1;
        refunded += order.refunded_cents;
        if !counts_as_revenue(order) {
            continue;
        }
        revenue += order.total_cents - order.refunded_cents;
        revenue_orders += 1;
        for item in &order.items {
            let entry = products
                .entry(item.product_id.clone())
                .or_insert_with(|| TopProduct {
                    product_id: item.product_id.clone(),
                    name: item.name.clone(),
                    quantity: 0,
                    revenue_cents: 0,
                });
            entry.quantity += item.quantity as u64;
            entry.revenue_cents += item.line_total_cents;
        }
    }

    let mut top_products: Vec<TopProduct> = products.into_values().collect();
    top_products.sort_by(|a, b| {
        b.revenue_cents
            .cmp(&a.revenue_cents)
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    top_products.truncate(TOP_PRODUCTS);

    Ok(OrderAnalytics {
        total_orders: orders.len(),
        by_status,
        revenue_cents: revenue,
        refunded_cents: refunded,
        average_order_value_cents: if revenue_orders > 0 {
            revenue / revenue_orders
        } else {
            0
        },
        top_products,
    })
}

pub async fn stats(db: &Db) -> AppResult<OrderStats> {
    let orders = db.find::<Order>(&Query::new()).await?;
    let since = Utc::now() - Duration::hours(24);
    let count = |status: OrderStatus| orders.iter().filter(|o| o.status == status).count();

    Ok(OrderStats {
        total_orders: orders.len(),
        pending_orders: count(OrderStatus::Pending),
        delivered_orders: count(OrderStatus::Delivered),
        cancelled_orders: count(OrderStatus::Cancelled),
        orders_today: orders.iter().filter(|o| o.created_at >= since).count(),
        revenue_cents: orders
            .iter()
            .filter(|o| counts_as_revenue(o))
            .map(|o| o.total_cents - o.refunded_cents)
            .sum(),
    })
}

pub fn statuses() -> Vec<StatusInfo> {
    OrderStatus::ALL
        .iter()
        .map(|status| StatusInfo {
            status: *status,
            next: status.next_statuses().to_vec(),
        })
        .collect()
}
