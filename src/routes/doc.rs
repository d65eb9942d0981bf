use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        orders::{
            CancelOrderRequest, CheckoutItem, CheckoutRequest, CheckoutResponse, OrderList,
            OrderWithItems, PaymentRedirectDto, UpdateOrderNotesRequest, UpdateOrderStatusRequest,
        },
        products::{CategoryList, ProductList},
        webhook::{NotificationData, PaymentNotification, WebhookAck},
    },
    models::{
        Category, DeliveryType, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus,
        Product, ShippingAddress, User,
    },
    response::{ApiResponse, Meta},
    routes::{admin, auth, health, orders, params, payments, products},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        products::list_products,
        products::get_product,
        products::list_categories,
        orders::list_orders,
        orders::checkout,
        orders::get_order,
        orders::retry_payment,
        payments::payment_webhook,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::update_order_notes,
        admin::cancel_order
    ),
    components(
        schemas(
            User,
            Category,
            Product,
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            DeliveryType,
            PaymentMethod,
            ShippingAddress,
            CheckoutItem,
            CheckoutRequest,
            CheckoutResponse,
            PaymentRedirectDto,
            UpdateOrderStatusRequest,
            UpdateOrderNotesRequest,
            CancelOrderRequest,
            PaymentNotification,
            NotificationData,
            WebhookAck,
            OrderList,
            OrderWithItems,
            ProductList,
            CategoryList,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            params::AdminOrderQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<CheckoutResponse>,
            ApiResponse<WebhookAck>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Orders", description = "Checkout and customer order endpoints"),
        (name = "Payments", description = "Payment gateway callbacks"),
        (name = "Admin", description = "Staff order management"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
